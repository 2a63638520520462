//! Email-signup fraud scoring core.
//!
//! The sole entry point is [`FraudDetector::evaluate`]: a typed request in,
//! a typed decision out, transport-agnostic and independent of any HTTP
//! framework. Everything artifact-dependent (models, config, whitelists)
//! flows through [`ArtifactCache`] snapshots; MX lookups flow through
//! [`MxResolver`].

pub mod artifacts;
pub mod cache;
pub mod error;
pub mod feature_extractor;
pub mod forest;
pub mod heuristics;
pub mod lanes;
pub mod markov;
pub mod mx;
pub mod recorder;
pub mod scorer;
pub mod types;
pub mod whitelist;

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{instrument, warn};

pub use cache::{ArtifactCache, KvSource};
pub use error::{FraudError, Result};
pub use lanes::Lane;
pub use mx::MxResolver;
pub use recorder::{Recorder, WebhookConfig};
pub use types::{
    BlockReason, CalibrationMeta, Decision, EvaluationRequest, EvaluationResult, FeatureVector,
    Fingerprint, RequestContext, Signals,
};

/// Wires the scoring pipeline's stateful dependencies together. Constructed
/// once at startup; cheap to clone (everything inside is `Arc`-backed).
#[derive(Clone)]
pub struct FraudDetector<S: KvSource> {
    pub cache: Arc<ArtifactCache<S>>,
    pub mx: Arc<MxResolver>,
    pub recorder: Option<Arc<Recorder>>,
}

impl<S: KvSource> FraudDetector<S> {
    pub fn new(cache: Arc<ArtifactCache<S>>, mx: Arc<MxResolver>, recorder: Option<Arc<Recorder>>) -> Self {
        Self { cache, mx, recorder }
    }

    /// Evaluate one signup request end to end. Total: never panics on
    /// malformed input, never fails the caller for a downstream artifact or
    /// MX outage. Persistence is fired-and-forgotten after the response is
    /// computed.
    #[instrument(skip(self, request), fields(email_domain = %email_domain(&request.email), request_id = %request_id_of(request)))]
    pub async fn evaluate(&self, request: EvaluationRequest) -> EvaluationResult {
        let start = Instant::now();
        let result = self.evaluate_inner(&request, start).await;

        if let Some(recorder) = self.recorder.clone() {
            let request = request.clone();
            let result = result.clone();
            let config = self.cache.config().await.unwrap_or_default();
            tokio::spawn(async move {
                recorder.record(&request, &result, &config).await;
            });
        }

        result
    }

    async fn evaluate_inner(&self, request: &EvaluationRequest, start: Instant) -> EvaluationResult {
        let config = self.cache.config().await.unwrap_or_default();

        let normalized = match feature_extractor::normalize(&request.email) {
            Ok(n) => n,
            Err(_) => return invalid_email_result(start),
        };

        let disposable = self.cache.disposable_domains().await.unwrap_or_default();
        let tld_profiles = self.cache.tld_profiles().await.unwrap_or_default();

        let mut features = feature_extractor::extract(
            &normalized,
            request.context.as_ref(),
            &disposable,
            &tld_profiles,
            &config.feature_flags,
            feature_extractor::current_year(),
        );

        if config.feature_flags.mx_check {
            let mx_result = self.mx.resolve(&normalized.domain).await;
            feature_extractor::apply_mx(&mut features, mx_result.as_deref());
        }

        let legit2 = self.cache.markov_legit2().await;
        let fraud2 = self.cache.markov_fraud2().await;

        let (classification_risk, abnormality_risk_raw, ensemble_reason, degraded, raw_confidence, calibrated_confidence) = if !config.feature_flags.markov_chain {
            (0.0, 0.0, "markov_chain_disabled".to_string(), false, 0.0, None)
        } else {
            match (legit2, fraud2) {
            (Ok(legit2), Ok(fraud2)) => {
                let legit3 = self.cache.markov_legit3().await;
                let fraud3 = self.cache.markov_fraud3().await;
                let models3 = match (&legit3, &fraud3) {
                    (Some(l), Some(f)) => Some((l.as_ref(), f.as_ref())),
                    _ => None,
                };

                let local_for_markov = &normalized.local_canonical;
                let ensemble = markov::evaluate_ensemble(local_for_markov, &legit2, &fraud2, models3, &config.ensemble_thresholds);

                features.ce_legit2 = Some(ensemble.order2.map(|o| o.h_legit).unwrap_or(f64::INFINITY));
                features.ce_fraud2 = Some(ensemble.order2.map(|o| o.h_fraud).unwrap_or(f64::INFINITY));
                if let Some(o2) = ensemble.order2 {
                    features.ce_diff2 = Some(o2.h_legit - o2.h_fraud);
                }
                if let Some(o3) = ensemble.order3 {
                    features.ce_legit3 = Some(o3.h_legit);
                    features.ce_fraud3 = Some(o3.h_fraud);
                    features.ce_diff3 = Some(o3.h_legit - o3.h_fraud);
                }
                features.min_entropy = Some(ensemble.h_legit.min(ensemble.h_fraud));

                let abnormality = markov::abnormality_risk(ensemble.h_legit, ensemble.h_fraud, &config.ood);

                let calibrated = config.calibration.as_ref().map(|cal| {
                    forest::sigmoid(cal.intercept + cal.coef * ensemble.confidence)
                });
                let classification = lanes::ClassificationLane {
                    markov_predicts_fraud: ensemble.predicts_fraud,
                    markov_confidence: ensemble.confidence,
                    calibrated_probability: calibrated,
                }
                .score(&features)
                .risk;
                (classification, abnormality, ensemble.reason, false, ensemble.confidence, calibrated)
            }
            _ => {
                warn!("markov models unavailable, applying degraded-model floor");
                (0.0, 0.0, "degraded_model".to_string(), true, 0.0, None)
            }
            }
        };

        features.abnormality_risk = abnormality_risk_raw;

        let forest_risk = match self.cache.forest().await {
            Some(forest) => match forest::ForestEvaluator::new(&forest) {
                Ok(evaluator) => {
                    let calibrated_score = evaluator.calibrated_score(&features);
                    Some(lanes::ForestLane { calibrated_score }.score(&features).risk)
                }
                Err(e) => {
                    warn!(error = %e, "forest calibration invalid, skipping forest lane");
                    None
                }
            },
            None => None,
        };

        let heuristics_cfg = self.cache.heuristics().await.unwrap_or_default();
        let (heuristic_bump, heuristic_hits) = heuristics::evaluate(&features, &heuristics_cfg);
        let heuristic_reasons: Vec<String> = heuristic_hits.iter().map(|h| h.reason.clone()).collect();
        let heuristic_risk = lanes::HeuristicLane { total_bump: heuristic_bump, reasons: heuristic_reasons.clone() }
            .score(&features)
            .risk;

        let is_disposable = config.feature_flags.disposable_check && disposable.domains.contains(&normalized.domain);
        let domain_risk = lanes::DomainLane { tld_risk: features.tld_risk, is_disposable }.score(&features).risk;

        let whitelist_cfg = self.cache.whitelist().await.unwrap_or_default();
        let whitelist_reduction = whitelist::evaluate(
            &request.email,
            &whitelist_cfg,
            &config.global_settings,
            feature_extractor::current_year() as u32,
        );

        let abnormality_risk = lanes::AbnormalityLane {
            raw_abnormality_risk: abnormality_risk_raw,
            local_part_len: normalized.local_canonical.chars().count(),
        }
        .score(&features)
        .risk;

        let risk_score = if degraded {
            scorer::degraded_model_floor(&config)
        } else {
            let lanes = scorer::LaneInputs {
                classification_risk,
                abnormality_risk,
                forest_risk,
                heuristic_risk,
                domain_risk,
                whitelist_reduction,
            };
            scorer::combine(&lanes)
        };

        let decision = scorer::decide(risk_score, &config);

        let reasons = scorer::triggering_reasons(
            false,
            is_disposable,
            classification_risk,
            abnormality_risk,
            forest_risk,
            heuristic_risk,
            domain_risk,
            &config,
        );
        let block_reason = if decision == Decision::Block {
            BlockReason::highest_precedence(&reasons)
        } else {
            None
        };

        let (pattern_family, pattern_confidence) = {
            let (family, confidence) = whitelist::pattern_family(
                &normalized.local_canonical,
                feature_extractor::current_year() as u32,
            );
            (Some(family), Some(confidence))
        };

        let calibration = scorer::calibration_meta(&config, raw_confidence, calibrated_confidence);

        let signals = Signals {
            features,
            classification_risk,
            abnormality_risk,
            heuristic_risk,
            forest_risk,
            domain_risk,
            whitelist_reduction,
            ensemble_reason,
            pattern_family,
            pattern_confidence,
            degraded_model: degraded,
            heuristic_reasons,
        };

        EvaluationResult {
            valid: true,
            decision,
            risk_score,
            signals,
            block_reason,
            fingerprint: Some(fingerprint_of(request)),
            calibration,
            model_version: config.version.clone(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

fn invalid_email_result(start: Instant) -> EvaluationResult {
    EvaluationResult {
        valid: false,
        decision: Decision::Block,
        risk_score: 1.0,
        signals: Signals {
            features: FeatureVector { invalid_email: true, ..Default::default() },
            classification_risk: 0.0,
            abnormality_risk: 0.0,
            heuristic_risk: 0.0,
            forest_risk: None,
            domain_risk: 0.0,
            whitelist_reduction: 0.0,
            ensemble_reason: "format_invalid".to_string(),
            pattern_family: None,
            pattern_confidence: None,
            degraded_model: false,
            heuristic_reasons: vec![],
        },
        block_reason: Some(BlockReason::FormatInvalid),
        fingerprint: None,
        calibration: CalibrationMeta {
            version: "none".to_string(),
            created_at: String::new(),
            calibration_used: false,
            calibration_boosted: false,
            boost_amount: 0.0,
        },
        model_version: "unversioned".to_string(),
        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

fn email_domain(email: &str) -> String {
    email.rsplit('@').next().unwrap_or("").to_string()
}

fn request_id_of(request: &EvaluationRequest) -> String {
    request
        .context
        .as_ref()
        .and_then(|c| c.request_id.as_ref())
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| "unassigned".to_string())
}

fn fingerprint_of(request: &EvaluationRequest) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(request.email.as_bytes());
    if let Some(ctx) = &request.context {
        if let Some(ip) = &ctx.client_ip {
            hasher.update(ip.as_bytes());
        }
    }
    let hash = format!("{:x}", hasher.finalize());
    Fingerprint {
        hash,
        country: request.context.as_ref().and_then(|c| c.country.clone()),
        asn: request.context.as_ref().and_then(|c| c.asn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Config;
    use async_trait::async_trait;

    struct EmptyKv;

    #[async_trait]
    impl KvSource for EmptyKv {
        async fn fetch_raw(&self, key: &str) -> Result<(serde_json::Value, Option<String>)> {
            if key == "config.json" {
                return Ok((serde_json::to_value(Config::default()).unwrap(), None));
            }
            Err(FraudError::KvFetchFailed(key.to_string(), "not seeded in test".to_string()))
        }
    }

    fn detector() -> FraudDetector<EmptyKv> {
        let cache = Arc::new(ArtifactCache::new(Arc::new(EmptyKv)));
        let mx = Arc::new(MxResolver::default());
        FraudDetector::new(cache, mx, None)
    }

    #[tokio::test]
    async fn malformed_email_blocks_with_format_invalid() {
        let detector = detector();
        let request = EvaluationRequest { email: "not-an-email".to_string(), context: None, consumer: None, flow: None };
        let result = detector.evaluate(request).await;
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.block_reason, Some(BlockReason::FormatInvalid));
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn missing_markov_models_triggers_degraded_floor() {
        let detector = detector();
        let request = EvaluationRequest { email: "jane.doe@example.com".to_string(), context: None, consumer: None, flow: None };
        let result = detector.evaluate(request).await;
        assert!(result.signals.degraded_model);
        let config = Config::default();
        assert!(result.risk_score >= config.risk_thresholds.warn);
    }
}
