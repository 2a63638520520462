//! fraud-core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait the scoring service implements
//! - Common domain types (RequestId, AccountId, etc.)
//! - Error handling utilities
//! - Configuration management

pub mod config;
pub mod domain;
pub mod error;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{CoreError, Result};
pub use service::{DependencyStatus, HealthStatus, ReadinessStatus, ScoringService, ServiceRuntime};
