//! HTTP handlers for the fraud-api validation surface

use axum::{extract::State, http::HeaderValue, response::IntoResponse, Json};
use fraud_core::{DependencyStatus, HealthStatus, ReadinessStatus};
use fraud_detect::EvaluationRequest;

use crate::AppState;

static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

pub async fn health() -> Json<HealthStatus> {
    let start = START.get_or_init(std::time::Instant::now);
    Json(HealthStatus {
        healthy: true,
        service_id: "fraud-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start.elapsed().as_secs(),
    })
}

pub async fn ready(State(state): State<AppState>) -> Json<ReadinessStatus> {
    let db_healthy = state.db.is_healthy().await;
    let failed_refreshes = state.detector.cache.failed_refresh_count();

    let dependencies = vec![
        DependencyStatus {
            name: "decision-ledger".to_string(),
            available: db_healthy,
            latency_ms: None,
        },
        DependencyStatus {
            name: "artifact-cache".to_string(),
            available: failed_refreshes == 0,
            latency_ms: None,
        },
    ];

    Json(ReadinessStatus {
        ready: db_healthy,
        dependencies,
    })
}

/// `POST /validate`: the thin adapter over `fraud-detect::evaluate` (§10.5).
/// Request/response (de)serialization and response headers are the extent
/// of this handler's responsibility — all scoring logic lives in the core.
pub async fn validate(
    State(state): State<AppState>,
    Json(mut request): Json<EvaluationRequest>,
) -> impl IntoResponse {
    let context = request.context.get_or_insert_with(Default::default);
    if context.request_id.is_none() {
        context.request_id = Some(fraud_core::RequestId::generate());
    }

    let result = state.detector.evaluate(request).await;

    let mut response = Json(&result).into_response();
    let headers = response.headers_mut();

    if let Ok(v) = HeaderValue::from_str(result.decision.as_str()) {
        headers.insert("X-Fraud-Decision", v);
    }
    if let Ok(v) = HeaderValue::from_str(&result.risk_score.to_string()) {
        headers.insert("X-Fraud-Risk-Score", v);
    }
    if let Some(reason) = &result.block_reason {
        if let Ok(v) = HeaderValue::from_str(&format!("{reason:?}")) {
            headers.insert("X-Fraud-Reason", v);
        }
    }
    if let Some(fingerprint) = &result.fingerprint {
        if let Ok(v) = HeaderValue::from_str(&fingerprint.hash) {
            headers.insert("X-Fraud-Fingerprint", v);
        }
    }

    response
}
