//! End-to-end scenarios over `FraudDetector::evaluate`, exercising the full
//! pipeline against small hand-built artifacts rather than real trained
//! models — enough to pin down the decision/risk-band properties without
//! needing a production Markov corpus.

use std::collections::HashMap as Map;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use fraud_detect::artifacts::{Config, FeatureFlags, HeuristicRule, MarkovModel, MarkovState};
use fraud_detect::types::{Decision, EvaluationRequest};
use fraud_detect::{ArtifactCache, FraudDetector, KvSource, MxResolver, Result};

/// Builds a 2-gram model that predicts `text` very well (every observed
/// context heavily favors the actual next character) and nothing else.
fn trained_model(text: &str) -> MarkovModel {
    let chars: Vec<char> = text.chars().collect();
    let mut states: Map<String, MarkovState> = Map::new();
    for i in 0..chars.len() {
        let start = i.saturating_sub(2);
        let context: String = chars[start..i].iter().collect();
        let next = chars[i];
        let state = states.entry(context).or_insert_with(|| MarkovState {
            counts: Map::new(),
            total: 0,
        });
        *state.counts.entry(next).or_insert(0) += 500;
        state.total += 500;
    }
    MarkovModel { order: 2, states, training_count: 1, ce_history: vec![] }
}

fn empty_model() -> MarkovModel {
    MarkovModel { order: 2, states: Map::new(), training_count: 0, ce_history: vec![] }
}

struct FakeKv {
    artifacts: Map<&'static str, serde_json::Value>,
}

impl FakeKv {
    fn new() -> Self {
        let mut config = Config::default();
        config.feature_flags = FeatureFlags { mx_check: false, ..FeatureFlags::default() };

        let mut artifacts = Map::new();
        artifacts.insert("config.json", serde_json::to_value(&config).unwrap());
        artifacts.insert("risk-heuristics.json", json!({ "rules": [] }));
        artifacts.insert("whitelist_config.json", json!({ "entries": [] }));
        artifacts.insert("disposable_domains.json", json!({ "domains": ["tempmail.com"] }));
        artifacts.insert("tld_profiles.json", json!({ "risk_by_tld": {} }));
        Self { artifacts }
    }

    fn with_markov(mut self, legit: MarkovModel, fraud: MarkovModel) -> Self {
        self.artifacts.insert("MM_legit_2gram", serde_json::to_value(&legit).unwrap());
        self.artifacts.insert("MM_fraud_2gram", serde_json::to_value(&fraud).unwrap());
        self
    }

    fn with_heuristics(mut self, rules: Vec<HeuristicRule>) -> Self {
        self.artifacts.insert("risk-heuristics.json", serde_json::to_value(&fraud_detect::artifacts::Heuristics { rules }).unwrap());
        self
    }
}

#[async_trait]
impl KvSource for FakeKv {
    async fn fetch_raw(&self, key: &str) -> Result<(serde_json::Value, Option<String>)> {
        self.artifacts
            .get(key)
            .cloned()
            .map(|v| (v, None))
            .ok_or_else(|| fraud_detect::FraudError::ModelMissing(key.to_string()))
    }
}

fn detector(kv: FakeKv) -> FraudDetector<FakeKv> {
    let cache = Arc::new(ArtifactCache::new(Arc::new(kv)));
    let mx = Arc::new(MxResolver::new(10, Duration::from_secs(60), Duration::from_millis(50)));
    FraudDetector::new(cache, mx, None)
}

fn request(email: &str) -> EvaluationRequest {
    EvaluationRequest {
        email: email.to_string(),
        context: None,
        consumer: None,
        flow: None,
    }
}

/// S1: a well-formed, well-predicted local part on a major free provider
/// allows cleanly with both Markov-derived risks at zero.
#[tokio::test]
async fn s1_known_good_pattern_allows() {
    let kv = FakeKv::new().with_markov(trained_model("john.smith"), empty_model());
    let result = detector(kv).evaluate(request("john.smith@gmail.com")).await;

    assert_eq!(result.decision, Decision::Allow);
    assert!(result.risk_score < 0.30, "risk_score={}", result.risk_score);
    assert_eq!(result.signals.classification_risk, 0.0);
    assert_eq!(result.signals.abnormality_risk, 0.0);
    assert_eq!(result.signals.features.provider_is_free, 1.0);
    assert!(result.signals.heuristic_reasons.is_empty());
}

/// S4: a disposable domain plus a local part neither model can explain
/// drives both the OOD abnormality lane and the domain lane to their caps,
/// blocking outright.
#[tokio::test]
async fn s4_disposable_and_unexplainable_local_part_blocks() {
    let kv = FakeKv::new().with_markov(trained_model("john.smith"), trained_model("john.smith"));
    let result = detector(kv).evaluate(request("xkjgh2k9qw@tempmail.com")).await;

    assert_eq!(result.decision, Decision::Block);
    assert_eq!(result.signals.features.provider_is_disposable, 1.0);
    let ood = fraud_detect::artifacts::OodThresholds::default();
    assert_eq!(result.signals.abnormality_risk, ood.max_risk);
    assert!(result.signals.domain_risk >= 0.2, "domain_risk={}", result.signals.domain_risk);
}

/// S5: a local part too short for the Markov/OOD lane to judge reliably
/// allows via the short-local guardrail, independent of model noise.
#[tokio::test]
async fn s5_short_local_part_guardrail_allows() {
    let kv = FakeKv::new().with_markov(empty_model(), empty_model());
    let result = detector(kv).evaluate(request("tim@acme.corp")).await;

    assert_eq!(result.decision, Decision::Allow);
    assert_eq!(result.signals.abnormality_risk, 0.0);
    assert!(result.signals.heuristic_reasons.is_empty());
}

/// S2: a generic-base trailing digit run (not a plausible birth year) on a
/// model the legit side explains well gets a high sequential-confidence
/// feature and an applied heuristic bump, without Markov/OOD noise.
#[tokio::test]
async fn s2_sequential_digit_pattern_applies_heuristic_bump() {
    let kv = FakeKv::new()
        .with_markov(trained_model("user123"), empty_model())
        .with_heuristics(vec![HeuristicRule {
            signal: "sequential_pattern".to_string(),
            condition: "sequential_confidence>=0.7".to_string(),
            bump: 0.08,
            reason: "sequential_digits".to_string(),
        }]);
    let result = detector(kv).evaluate(request("user123@gmail.com")).await;

    assert!(
        result.signals.features.sequential_confidence >= 0.7,
        "sequential_confidence={}",
        result.signals.features.sequential_confidence
    );
    assert_eq!(result.signals.features.has_plus_addressing, 0.0);
    assert!(result.signals.heuristic_reasons.contains(&"sequential_digits".to_string()));
    assert!(result.signals.heuristic_risk > 0.0);
}

/// S3: a local part the fraud model explains well and the legit model
/// cannot drives classification confidence high and blocks.
#[tokio::test]
async fn s3_markov_fraud_confidence_blocks() {
    let kv = FakeKv::new().with_markov(empty_model(), trained_model("qwerty456"));
    let result = detector(kv).evaluate(request("qwerty456@yahoo.com")).await;

    assert!(
        result.signals.classification_risk >= 0.7,
        "classification_risk={}",
        result.signals.classification_risk
    );
    assert_eq!(result.decision, Decision::Block);
    assert!(matches!(
        result.block_reason,
        Some(fraud_detect::types::BlockReason::Classification) | Some(fraud_detect::types::BlockReason::Forest)
    ));
}

/// S6: a trailing 4-digit run that reads as a plausible birth year is
/// exempted from the sequential-pattern penalty and scored as low dated
/// risk, so it allows or warns rather than blocking.
#[tokio::test]
async fn s6_plausible_birth_year_is_low_risk() {
    let kv = FakeKv::new().with_markov(trained_model("sarah1990"), empty_model());
    let result = detector(kv).evaluate(request("sarah1990@gmail.com")).await;

    assert!(
        result.signals.features.dated_pattern_risk <= 0.20,
        "dated_pattern_risk={}",
        result.signals.features.dated_pattern_risk
    );
    assert_ne!(result.decision, Decision::Block);
}

/// Malformed input never reaches the scoring lanes: it short-circuits to a
/// block with `FormatInvalid`.
#[tokio::test]
async fn malformed_email_short_circuits_to_format_invalid_block() {
    let kv = FakeKv::new();
    let result = detector(kv).evaluate(request("not-an-email")).await;

    assert!(!result.valid);
    assert_eq!(result.decision, Decision::Block);
    assert_eq!(result.block_reason, Some(fraud_detect::types::BlockReason::FormatInvalid));
    assert_eq!(result.risk_score, 1.0);
}
