//! Tagged-variant lane architecture (§9): each risk contributor implements
//! the same small contract so the Scorer composes them with pure functions
//! instead of dynamic dispatch.

use crate::scorer;
use crate::types::FeatureVector;

/// One risk lane's output: a risk in `[0,1]` and a short reason token used
/// in signal reporting and block-reason precedence.
#[derive(Debug, Clone)]
pub struct LaneOutput {
    pub risk: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassificationLane {
    pub markov_predicts_fraud: bool,
    pub markov_confidence: f64,
    pub calibrated_probability: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct AbnormalityLane {
    pub raw_abnormality_risk: f64,
    pub local_part_len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ForestLane {
    pub calibrated_score: f64,
}

#[derive(Debug, Clone)]
pub struct HeuristicLane {
    pub total_bump: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DomainLane {
    pub tld_risk: f64,
    pub is_disposable: bool,
}

/// Shared contract for every lane: produce a risk contribution from the
/// already-extracted feature vector (most lanes carry their own
/// pre-computed inputs rather than re-deriving from `features`, since those
/// inputs come from distinct upstream components).
pub trait Lane {
    fn score(&self, features: &FeatureVector) -> LaneOutput;
}

impl Lane for ClassificationLane {
    fn score(&self, _features: &FeatureVector) -> LaneOutput {
        let risk = scorer::classification_risk(
            self.markov_predicts_fraud,
            self.markov_confidence,
            self.calibrated_probability,
        );
        LaneOutput { risk, reason: "classification".to_string() }
    }
}

impl Lane for AbnormalityLane {
    fn score(&self, _features: &FeatureVector) -> LaneOutput {
        let risk = scorer::guard_short_local(self.local_part_len, self.raw_abnormality_risk);
        LaneOutput { risk, reason: "abnormality".to_string() }
    }
}

impl Lane for ForestLane {
    fn score(&self, _features: &FeatureVector) -> LaneOutput {
        LaneOutput { risk: self.calibrated_score, reason: "forest".to_string() }
    }
}

impl Lane for HeuristicLane {
    fn score(&self, _features: &FeatureVector) -> LaneOutput {
        LaneOutput { risk: self.total_bump.min(1.0), reason: self.reasons.join(",") }
    }
}

impl Lane for DomainLane {
    fn score(&self, _features: &FeatureVector) -> LaneOutput {
        let risk = scorer::domain_risk(self.tld_risk, self.is_disposable);
        LaneOutput { risk, reason: "domain".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_lane_matches_scorer_function() {
        let lane = ClassificationLane { markov_predicts_fraud: true, markov_confidence: 0.6, calibrated_probability: None };
        let out = lane.score(&FeatureVector::default());
        assert_eq!(out.risk, 0.6);
    }

    #[test]
    fn abnormality_lane_applies_short_local_guardrail() {
        let lane = AbnormalityLane { raw_abnormality_risk: 0.5, local_part_len: 3 };
        let out = lane.score(&FeatureVector::default());
        assert_eq!(out.risk, 0.0);
    }

    #[test]
    fn domain_lane_caps_at_point_four() {
        let lane = DomainLane { tld_risk: 0.5, is_disposable: true };
        let out = lane.score(&FeatureVector::default());
        assert_eq!(out.risk, 0.4);
    }
}
