//! Fraud detection API
//!
//! Thin HTTP surface over the `fraud-detect` scoring core: a single
//! `POST /validate` endpoint plus health/readiness probes. All scoring,
//! artifact caching and MX resolution logic lives in `fraud-detect`; this
//! binary only wires it to Postgres and axum.

mod config;
mod error;
mod handlers;
mod kv;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use fraud_db::{FraudDbPool, PoolConfig};
use fraud_detect::{ArtifactCache, FraudDetector, MxResolver, Recorder, WebhookConfig};
use tokio::net::TcpListener;
use tracing::info;

pub use config::Config;
pub use error::{Error, Result};
use kv::PgKvSource;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: FraudDbPool,
    pub detector: FraudDetector<PgKvSource>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _telemetry = fraud_telemetry::init("fraud-api")
        .map_err(|e| anyhow::anyhow!("telemetry init failed: {e}"))?;

    info!("Starting fraud-api");

    let config = Config::from_env()?;
    let bind_addr = config.bind_address();

    let pool = FraudDbPool::new(PoolConfig {
        url: config.database_url.clone(),
        max_size: 32,
        min_idle: Some(4),
    })
    .await?;

    let kv_source = Arc::new(PgKvSource::new(pool.clone()));
    let cache = Arc::new(ArtifactCache::new(kv_source));
    let mx = Arc::new(MxResolver::new(10_000, Duration::from_secs(300), Duration::from_millis(200)));

    let webhook = config.webhook_url.as_ref().map(|url| WebhookConfig {
        url: url.clone(),
        block_risk_threshold: config.webhook_block_risk_threshold,
    });
    let recorder = Arc::new(Recorder::new(pool.clone(), webhook));

    let detector = FraudDetector::new(cache, mx, Some(recorder));

    let state = AppState {
        db: pool,
        detector,
        config: Arc::new(config),
    };

    let app = routes::create_router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("fraud-api listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
