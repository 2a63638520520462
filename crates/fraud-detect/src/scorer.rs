//! Scorer (§4.6): combines lane risks into a final decision, applying the
//! short-local guardrail and the degraded-model floor.

use crate::artifacts::{Config, OodThresholds};
use crate::types::{BlockReason, CalibrationMeta, Decision};

/// Apply the short-local guardrail: very short local parts are naturally
/// abnormal under the Markov models and must not be punished for it.
pub fn guard_short_local(local_part_len: usize, abnormality_risk: f64) -> f64 {
    if local_part_len <= 4 {
        0.0
    } else if local_part_len < 12 {
        let scale = ((local_part_len as f64) - 4.0) / 8.0;
        (abnormality_risk * scale.clamp(0.0, 1.0)).clamp(0.0, 1.0)
    } else {
        abnormality_risk
    }
}

/// classificationRisk per §4.6: markov confidence if fraud-predicting, and
/// never suppressed below that floor by calibration (boost-only).
pub fn classification_risk(
    markov_predicts_fraud: bool,
    markov_confidence: f64,
    calibrated_probability: Option<f64>,
) -> f64 {
    let base = if markov_predicts_fraud { markov_confidence } else { 0.0 };
    match calibrated_probability {
        Some(p) => base.max(p),
        None => base,
    }
}

/// domainRisk per §4.6.
pub fn domain_risk(tld_risk: f64, is_disposable: bool) -> f64 {
    let bump = if is_disposable { 0.20 } else { 0.0 };
    (tld_risk + bump).min(0.4)
}

pub struct LaneInputs {
    pub classification_risk: f64,
    pub abnormality_risk: f64,
    pub forest_risk: Option<f64>,
    pub heuristic_risk: f64,
    pub domain_risk: f64,
    pub whitelist_reduction: f64,
}

/// Combine all lanes into the final, pre-floor risk score.
pub fn combine(lanes: &LaneInputs) -> f64 {
    let top = lanes
        .classification_risk
        .max(lanes.abnormality_risk)
        .max(lanes.forest_risk.unwrap_or(0.0));
    let pre_whitelist = (top + lanes.domain_risk + lanes.heuristic_risk).min(1.0);
    (pre_whitelist - lanes.whitelist_reduction).max(0.0)
}

/// The degraded-model floor applied when Markov models fail to load.
pub fn degraded_model_floor(config: &Config) -> f64 {
    (config.risk_thresholds.warn + 0.01).max(0.8 * config.risk_thresholds.block)
}

/// Decision mapping from a final risk score.
pub fn decide(risk_score: f64, config: &Config) -> Decision {
    if risk_score >= config.risk_thresholds.block {
        Decision::Block
    } else if risk_score >= config.risk_thresholds.warn {
        Decision::Warn
    } else {
        Decision::Allow
    }
}

/// Determine which block reasons are independently triggering, for
/// `BlockReason::highest_precedence`.
pub fn triggering_reasons(
    invalid_email: bool,
    is_disposable: bool,
    classification_risk: f64,
    abnormality_risk: f64,
    forest_risk: Option<f64>,
    heuristic_risk: f64,
    domain_risk: f64,
    config: &Config,
) -> Vec<BlockReason> {
    let block = config.risk_thresholds.block;
    let mut reasons = Vec::new();
    if invalid_email {
        reasons.push(BlockReason::FormatInvalid);
    }
    if is_disposable {
        reasons.push(BlockReason::Disposable);
    }
    if classification_risk >= block {
        reasons.push(BlockReason::Classification);
    }
    if abnormality_risk >= block {
        reasons.push(BlockReason::Ood);
    }
    if forest_risk.map(|r| r >= block).unwrap_or(false) {
        reasons.push(BlockReason::Forest);
    }
    if heuristic_risk >= block {
        reasons.push(BlockReason::Heuristic);
    }
    if domain_risk >= block {
        reasons.push(BlockReason::Domain);
    }
    reasons
}

pub fn calibration_meta(config: &Config, raw_confidence: f64, calibrated: Option<f64>) -> CalibrationMeta {
    let (used, boosted, boost_amount) = match (&config.calibration, calibrated) {
        (Some(_), Some(p)) if p > raw_confidence => (true, true, p - raw_confidence),
        (Some(_), Some(_)) => (true, false, 0.0),
        _ => (false, false, 0.0),
    };
    let (version, created_at) = config
        .calibration
        .as_ref()
        .map(|c| (c.version.clone(), c.created_at.clone()))
        .unwrap_or_else(|| ("none".to_string(), String::new()));
    CalibrationMeta { version, created_at, calibration_used: used, calibration_boosted: boosted, boost_amount }
}

pub fn ood_zone(abnormality_risk: f64, thresholds: &OodThresholds) -> &'static str {
    if abnormality_risk >= thresholds.max_risk {
        "block"
    } else if abnormality_risk > 0.0 {
        "warn"
    } else {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_local_under_five_zeros_abnormality() {
        assert_eq!(guard_short_local(3, 0.9), 0.0);
        assert_eq!(guard_short_local(4, 0.9), 0.0);
    }

    #[test]
    fn short_local_scales_between_five_and_twelve() {
        let scaled = guard_short_local(8, 0.8);
        assert!((scaled - 0.8 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn long_local_passes_through() {
        assert_eq!(guard_short_local(20, 0.6), 0.6);
    }

    #[test]
    fn classification_risk_is_boost_only() {
        let risk = classification_risk(true, 0.4, Some(0.2));
        assert_eq!(risk, 0.4, "calibration must never suppress the markov floor");
        let boosted = classification_risk(true, 0.4, Some(0.7));
        assert_eq!(boosted, 0.7);
    }

    #[test]
    fn domain_risk_caps_at_point_four() {
        assert_eq!(domain_risk(0.5, true), 0.4);
    }

    #[test]
    fn combine_applies_whitelist_reduction() {
        let lanes = LaneInputs {
            classification_risk: 0.5,
            abnormality_risk: 0.0,
            forest_risk: None,
            heuristic_risk: 0.1,
            domain_risk: 0.0,
            whitelist_reduction: 0.2,
        };
        assert_eq!(combine(&lanes), 0.4);
    }

    #[test]
    fn decision_mapping_respects_thresholds() {
        let config = Config::default();
        assert_eq!(decide(0.0, &config), Decision::Allow);
        assert_eq!(decide(config.risk_thresholds.warn, &config), Decision::Warn);
        assert_eq!(decide(config.risk_thresholds.block, &config), Decision::Block);
    }

    #[test]
    fn highest_precedence_prefers_format_invalid() {
        let reasons = vec![BlockReason::Heuristic, BlockReason::FormatInvalid, BlockReason::Ood];
        assert_eq!(BlockReason::highest_precedence(&reasons), Some(BlockReason::FormatInvalid));
    }
}
