//! Common types for fraud-db

use serde::{Deserialize, Serialize};

/// Key-Value entry for the artifact KV namespace (model blobs, config, whitelists)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub ttl_seconds: Option<i64>,
}

/// Time-series data point, used by the telemetry export path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub metric: String,
    pub value: f64,
    pub timestamp: i64,
    pub tags: std::collections::HashMap<String, String>,
}
