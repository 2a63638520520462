//! MarkovEnsemble (§4.2): 2-gram/3-gram character-model cross-entropy,
//! deterministic ensemble arbitration, and out-of-distribution abnormality.

use crate::artifacts::{EnsembleThresholds, MarkovModel, OodThresholds};

const VOCAB_SIZE: f64 = 46.0;
const SMOOTHING_FLOOR: f64 = 0.001;

/// Strip everything but alphanumerics and `._+-` before Markov evaluation.
pub fn strip_for_markov(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
        .collect()
}

/// Cross-entropy of `x` under order-`k` model `m`, in bits.
pub fn cross_entropy(x: &str, m: &MarkovModel) -> f64 {
    let chars: Vec<char> = x.chars().collect();
    let k = m.order as usize;
    if chars.is_empty() {
        return f64::INFINITY;
    }
    let mut total_log2 = 0.0;
    let n = chars.len();
    for i in 0..n {
        let start = i.saturating_sub(k);
        let context: String = chars[start..i].iter().collect();
        let next = chars[i];
        let p = match m.states.get(&context) {
            Some(state) => {
                let count = *state.counts.get(&next).unwrap_or(&0) as f64;
                (count + 1.0) / (state.total as f64 + VOCAB_SIZE)
            }
            None => SMOOTHING_FLOOR,
        };
        let p = p.max(SMOOTHING_FLOOR);
        total_log2 += p.log2();
    }
    -(total_log2 / n as f64)
}

#[derive(Debug, Clone, Copy)]
pub struct OrderResult {
    pub h_legit: f64,
    pub h_fraud: f64,
    pub predicts_fraud: bool,
    pub confidence: f64,
}

fn evaluate_order(x: &str, legit: &MarkovModel, fraud: &MarkovModel) -> OrderResult {
    let h_legit = cross_entropy(x, legit);
    let h_fraud = cross_entropy(x, fraud);
    let predicts_fraud = h_fraud < h_legit;
    let denom = h_legit.max(h_fraud);
    let confidence = if denom > 0.0 {
        (2.0 * (h_legit - h_fraud).abs() / denom).min(1.0)
    } else {
        0.0
    };
    OrderResult { h_legit, h_fraud, predicts_fraud, confidence }
}

#[derive(Debug, Clone)]
pub struct EnsembleResult {
    pub predicts_fraud: bool,
    pub confidence: f64,
    pub h_legit: f64,
    pub h_fraud: f64,
    pub reason: String,
    pub order2: Option<OrderResult>,
    pub order3: Option<OrderResult>,
}

impl EnsembleResult {
    fn safe_default(reason: &str) -> Self {
        Self {
            predicts_fraud: false,
            confidence: 0.0,
            h_legit: f64::INFINITY,
            h_fraud: f64::INFINITY,
            reason: reason.to_string(),
            order2: None,
            order3: None,
        }
    }
}

/// Evaluate the full 2-gram/3-gram ensemble per the deterministic arbitration
/// priority in §4.2.
pub fn evaluate_ensemble(
    local_part: &str,
    legit2: &MarkovModel,
    fraud2: &MarkovModel,
    models3: Option<(&MarkovModel, &MarkovModel)>,
    thresholds: &EnsembleThresholds,
) -> EnsembleResult {
    let x = strip_for_markov(local_part);
    let r2 = evaluate_order(&x, legit2, fraud2);

    if !r2.h_legit.is_finite() || !r2.h_fraud.is_finite() {
        return EnsembleResult::safe_default("invalid_entropy_fallback");
    }

    let r3 = models3.map(|(legit3, fraud3)| evaluate_order(&x, legit3, fraud3));

    let Some(r3) = r3 else {
        return EnsembleResult {
            predicts_fraud: r2.predicts_fraud,
            confidence: r2.confidence,
            h_legit: r2.h_legit,
            h_fraud: r2.h_fraud,
            reason: "2gram_only".to_string(),
            order2: Some(r2),
            order3: None,
        };
    };

    if !r3.h_legit.is_finite() || !r3.h_fraud.is_finite() {
        return EnsembleResult::safe_default("invalid_entropy_fallback");
    }

    let agree = r2.predicts_fraud == r3.predicts_fraud;

    if agree && r2.confidence.min(r3.confidence) > thresholds.agree {
        let (h_legit, h_fraud, confidence, order) = if r3.confidence >= r2.confidence {
            (r3.h_legit, r3.h_fraud, r3.confidence, 3)
        } else {
            (r2.h_legit, r2.h_fraud, r2.confidence, 2)
        };
        return EnsembleResult {
            predicts_fraud: r2.predicts_fraud,
            confidence,
            h_legit,
            h_fraud,
            reason: format!("agree_order{order}"),
            order2: Some(r2),
            order3: Some(r3),
        };
    }

    if r3.confidence > thresholds.override3 && r3.confidence > thresholds.override_ratio * r2.confidence {
        return EnsembleResult {
            predicts_fraud: r3.predicts_fraud,
            confidence: r3.confidence,
            h_legit: r3.h_legit,
            h_fraud: r3.h_fraud,
            reason: "3gram_override".to_string(),
            order2: Some(r2),
            order3: Some(r3),
        };
    }

    if r2.predicts_fraud && r2.confidence > thresholds.gibberish2_min && r2.h_fraud > thresholds.gibberish_entropy {
        return EnsembleResult {
            predicts_fraud: true,
            confidence: r2.confidence,
            h_legit: r2.h_legit,
            h_fraud: r2.h_fraud,
            reason: "gibberish_2gram".to_string(),
            order2: Some(r2),
            order3: Some(r3),
        };
    }

    if !agree {
        return EnsembleResult {
            predicts_fraud: r2.predicts_fraud,
            confidence: r2.confidence,
            h_legit: r2.h_legit,
            h_fraud: r2.h_fraud,
            reason: "disagreement_default_2gram".to_string(),
            order2: Some(r2),
            order3: Some(r3),
        };
    }

    let (h_legit, h_fraud, confidence, predicts_fraud, order) = if r3.confidence >= r2.confidence {
        (r3.h_legit, r3.h_fraud, r3.confidence, r3.predicts_fraud, 3)
    } else {
        (r2.h_legit, r2.h_fraud, r2.confidence, r2.predicts_fraud, 2)
    };
    EnsembleResult {
        predicts_fraud,
        confidence,
        h_legit,
        h_fraud,
        reason: format!("agree_weak_order{order}"),
        order2: Some(r2),
        order3: Some(r3),
    }
}

/// Piecewise OOD abnormality mapping from minimum final-order entropy.
pub fn abnormality_risk(h_legit_final: f64, h_fraud_final: f64, thresholds: &OodThresholds) -> f64 {
    let min_entropy = h_legit_final.min(h_fraud_final);
    if !min_entropy.is_finite() {
        return 0.0;
    }
    if min_entropy < thresholds.warn_threshold {
        0.0
    } else if min_entropy < thresholds.block_threshold {
        let span = thresholds.block_threshold - thresholds.warn_threshold;
        let t = if span > 0.0 { (min_entropy - thresholds.warn_threshold) / span } else { 1.0 };
        thresholds.warn_zone_min + t * (thresholds.max_risk - thresholds.warn_zone_min)
    } else {
        thresholds.max_risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn uniform_model(order: u8, alphabet: &str) -> MarkovModel {
        let mut states = HashMap::new();
        let mut counts = HashMap::new();
        for c in alphabet.chars() {
            counts.insert(c, 1);
        }
        let total = counts.len() as u32;
        states.insert(String::new(), crate::artifacts::MarkovState { counts: counts.clone(), total });
        MarkovModel { order, states, training_count: 100, ce_history: vec![] }
    }

    #[test]
    fn cross_entropy_finite_for_known_alphabet() {
        let m = uniform_model(2, "abcdefghijklmnopqrstuvwxyz");
        let h = cross_entropy("abcdef", &m);
        assert!(h.is_finite());
        assert!(h > 0.0);
    }

    #[test]
    fn empty_string_gives_infinite_entropy() {
        let m = uniform_model(2, "abc");
        assert!(cross_entropy("", &m).is_infinite());
    }

    #[test]
    fn ood_below_warn_threshold_is_zero() {
        let thresholds = OodThresholds::default();
        assert_eq!(abnormality_risk(2.0, 2.5, &thresholds), 0.0);
    }

    #[test]
    fn ood_above_block_threshold_is_max_risk() {
        let thresholds = OodThresholds::default();
        assert_eq!(abnormality_risk(6.0, 7.0, &thresholds), thresholds.max_risk);
    }

    #[test]
    fn ood_mid_zone_interpolates() {
        let thresholds = OodThresholds::default();
        let mid = (thresholds.warn_threshold + thresholds.block_threshold) / 2.0;
        let risk = abnormality_risk(mid, mid, &thresholds);
        assert!(risk > 0.0 && risk < thresholds.max_risk);
    }

    #[test]
    fn strip_keeps_only_local_part_alphabet() {
        assert_eq!(strip_for_markov("john.doe+test@x"), "john.doe+test");
    }

    #[test]
    fn ensemble_falls_back_to_2gram_only_without_3gram_models() {
        let legit2 = uniform_model(2, "abcdefghijklmnopqrstuvwxyz");
        let fraud2 = uniform_model(2, "abcdefghijklmnopqrstuvwxyz");
        let result = evaluate_ensemble("johnsmith", &legit2, &fraud2, None, &EnsembleThresholds::default());
        assert_eq!(result.reason, "2gram_only");
    }
}
