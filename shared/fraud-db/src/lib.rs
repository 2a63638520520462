//! fraud-db client
//!
//! PostgreSQL wire-protocol compatible client for the decision ledger store.
//! Provides connection pooling, typed queries, and KV-style artifact access.

mod client;
mod pool;
mod error;
mod types;

pub use client::FraudDbClient;
pub use pool::{FraudDbPool, PoolConfig};
pub use error::{FraudDbError, Result};
pub use types::*;

/// Re-export tokio-postgres types for convenience
pub use tokio_postgres::{Row, Statement, types::ToSql};
