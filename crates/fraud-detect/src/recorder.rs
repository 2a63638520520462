//! Recorder (§4.9): best-effort decision-ledger persistence and webhook
//! fan-out. Never fails the caller's response; failures are counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fraud_db::FraudDbPool;
use tracing::{error, warn};

use crate::artifacts::Config;
use crate::scorer;
use crate::types::{EvaluationRequest, EvaluationResult};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct WebhookConfig {
    pub url: String,
    pub block_risk_threshold: f64,
}

/// Persists evaluation outcomes and fires optional webhook alerts.
pub struct Recorder {
    pool: FraudDbPool,
    webhook: Option<WebhookConfig>,
    http: reqwest::Client,
    persist_failures: AtomicU64,
}

impl Recorder {
    pub fn new(pool: FraudDbPool, webhook: Option<WebhookConfig>) -> Self {
        Self {
            pool,
            webhook,
            http: reqwest::Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .expect("reqwest client builds with static config"),
            persist_failures: AtomicU64::new(0),
        }
    }

    pub fn persist_failure_count(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    /// Record one validation outcome. Spawned as a detached task by the
    /// caller so persistence never adds latency to the response path.
    pub async fn record(&self, request: &EvaluationRequest, result: &EvaluationResult, config: &Config) {
        if let Err(e) = self.persist(request, result, config).await {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to persist validation decision");
        }

        if self.should_alert(result) {
            self.fire_webhook(request, result).await;
        }
    }

    async fn persist(&self, request: &EvaluationRequest, result: &EvaluationResult, config: &Config) -> fraud_db::Result<()> {
        let client = self.pool.get().await?;
        let features = result.signals.features.as_map();

        let (local_part, domain) = split_canonical(&request.email);
        let tld = domain.rsplit('.').next().unwrap_or("").to_string();

        client
            .execute(
                "INSERT INTO validation_decisions (
                    decision, risk_score, block_reason, email_local_part, domain, tld,
                    fingerprint_hash, pattern_family, pattern_confidence, entropy, bigram_entropy,
                    tld_risk, domain_reputation, ce_legit2, ce_fraud2, ce_legit3, ce_fraud3,
                    ensemble_reason, ood_min_entropy, abnormality_risk, ood_zone,
                    calibration_version, model_version, client_ip, user_agent, asn, country,
                    region, city, colo, tls_ja4, bot_score, latency_ms
                ) VALUES (
                    $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,
                    $22,$23,$24,$25,$26,$27,$28,$29,$30,$31,$32
                )",
                &[
                    &result.decision.as_str(),
                    &result.risk_score,
                    &result.block_reason.map(|r| format!("{r:?}")),
                    &local_part,
                    &domain,
                    &tld,
                    &result.fingerprint.as_ref().map(|f| f.hash.clone()),
                    &result.signals.pattern_family,
                    &result.signals.pattern_confidence,
                    &features.get("entropy").copied().flatten(),
                    &features.get("bigram_entropy").copied().flatten(),
                    &features.get("tld_risk").copied().flatten(),
                    &result.signals.domain_risk,
                    &features.get("ce_legit2").copied().flatten(),
                    &features.get("ce_fraud2").copied().flatten(),
                    &features.get("ce_legit3").copied().flatten(),
                    &features.get("ce_fraud3").copied().flatten(),
                    &result.signals.ensemble_reason,
                    &features.get("min_entropy").copied().flatten(),
                    &result.signals.abnormality_risk,
                    &scorer::ood_zone(result.signals.abnormality_risk, &config.ood),
                    &result.calibration.version,
                    &result.model_version,
                    &request.context.as_ref().and_then(|c| c.client_ip.clone()),
                    &request.context.as_ref().and_then(|c| c.user_agent.clone()),
                    &request.context.as_ref().and_then(|c| c.asn.map(|v| v as i64)),
                    &request.context.as_ref().and_then(|c| c.country.clone()),
                    &request.context.as_ref().and_then(|c| c.region.clone()),
                    &request.context.as_ref().and_then(|c| c.city.clone()),
                    &request.context.as_ref().and_then(|c| c.colo.clone()),
                    &request.context.as_ref().and_then(|c| c.tls_ja4.clone()),
                    &features.get("bot_score").copied().flatten(),
                    &result.latency_ms,
                ],
            )
            .await?;
        Ok(())
    }

    fn should_alert(&self, result: &EvaluationResult) -> bool {
        match &self.webhook {
            Some(cfg) => {
                (result.decision.as_str() == "block" && result.risk_score >= cfg.block_risk_threshold)
                    || result.signals.degraded_model
            }
            None => false,
        }
    }

    async fn fire_webhook(&self, request: &EvaluationRequest, result: &EvaluationResult) {
        let Some(cfg) = &self.webhook else { return };
        let bucket = chrono::Utc::now().timestamp() / 60;
        let idempotency_key = format!(
            "{}:{}",
            result.fingerprint.as_ref().map(|f| f.hash.as_str()).unwrap_or("unknown"),
            bucket
        );
        let payload = serde_json::json!({
            "idempotency_key": idempotency_key,
            "email_domain": request.email.rsplit('@').next(),
            "decision": result.decision.as_str(),
            "risk_score": result.risk_score,
            "block_reason": result.block_reason,
            "model_version": result.model_version,
        });

        if let Err(e) = self.http.post(&cfg.url).json(&payload).send().await {
            warn!(error = %e, "webhook delivery failed");
        }
    }
}

fn split_canonical(email: &str) -> (String, String) {
    match email.split_once('@') {
        Some((local, domain)) => (local.to_lowercase(), domain.to_lowercase()),
        None => (email.to_lowercase(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_canonical_lowercases_both_parts() {
        let (local, domain) = split_canonical("John.Doe@Example.COM");
        assert_eq!(local, "john.doe");
        assert_eq!(domain, "example.com");
    }
}
