//! KV artifact source (§6.3) backed by the decision-ledger Postgres
//! instance: a `kv_artifacts` table keyed by artifact name, holding the
//! JSON value and its SHA-256 checksum.

use async_trait::async_trait;
use fraud_db::FraudDbPool;
use fraud_detect::{FraudError, KvSource, Result};

#[derive(Clone)]
pub struct PgKvSource {
    pool: FraudDbPool,
}

impl PgKvSource {
    pub fn new(pool: FraudDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvSource for PgKvSource {
    async fn fetch_raw(&self, key: &str) -> Result<(serde_json::Value, Option<String>)> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| FraudError::KvFetchFailed(key.to_string(), e.to_string()))?;

        let row = client
            .query_opt("SELECT value, checksum FROM kv_artifacts WHERE key = $1", &[&key])
            .await
            .map_err(|e| FraudError::KvFetchFailed(key.to_string(), e.to_string()))?
            .ok_or_else(|| FraudError::ModelMissing(key.to_string()))?;

        let value: serde_json::Value = row.get("value");
        let checksum: Option<String> = row.get("checksum");
        Ok((value, checksum))
    }
}
