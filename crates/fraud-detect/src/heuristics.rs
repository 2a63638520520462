//! HeuristicEngine (§4.4): config-driven additive risk bumps.

use crate::artifacts::Heuristics;
use crate::types::FeatureVector;

/// Outcome of one matched rule: the bump applied and the reason token
/// recorded for the signals report.
#[derive(Debug, Clone)]
pub struct HeuristicHit {
    pub signal: String,
    pub bump: f64,
    pub reason: String,
}

/// Evaluate every configured rule against `features`, each signal
/// contributing at most once, returning the capped total and the list of
/// hits for the explanation trail.
pub fn evaluate(features: &FeatureVector, heuristics: &Heuristics) -> (f64, Vec<HeuristicHit>) {
    let mut total = 0.0;
    let mut hits = Vec::new();
    let mut fired_signals = std::collections::HashSet::new();

    for rule in &heuristics.rules {
        if fired_signals.contains(&rule.signal) {
            continue;
        }
        if matches_condition(features, &rule.condition) {
            total += rule.bump;
            fired_signals.insert(rule.signal.clone());
            hits.push(HeuristicHit {
                signal: rule.signal.clone(),
                bump: rule.bump,
                reason: rule.reason.clone(),
            });
        }
    }

    (total.min(1.0), hits)
}

/// Conditions are small comparisons over named features, written
/// `field`, `field>=X`, `field>X`, `field<=X`, `field<X`, or `field==X` in
/// config. Two-character operators are matched before their single-character
/// prefix so `>=`/`<=` aren't swallowed by `>`/`<`.
fn matches_condition(features: &FeatureVector, condition: &str) -> bool {
    let compare = |field: &str, threshold: &str, cmp: fn(f64, f64) -> bool| {
        let Ok(threshold) = threshold.trim().parse::<f64>() else {
            return false;
        };
        features.get(field.trim()).map(|v| cmp(v, threshold)).unwrap_or(false)
    };

    if let Some((field, threshold)) = condition.split_once(">=") {
        return compare(field, threshold, |v, t| v >= t);
    }
    if let Some((field, threshold)) = condition.split_once("<=") {
        return compare(field, threshold, |v, t| v <= t);
    }
    if let Some((field, threshold)) = condition.split_once("==") {
        return compare(field, threshold, |v, t| v == t);
    }
    if let Some((field, threshold)) = condition.split_once('>') {
        return compare(field, threshold, |v, t| v > t);
    }
    if let Some((field, threshold)) = condition.split_once('<') {
        return compare(field, threshold, |v, t| v < t);
    }
    // Bare boolean-style field name: true when the feature is nonzero.
    features.get(condition.trim()).map(|v| v != 0.0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::HeuristicRule;

    fn rule(signal: &str, condition: &str, bump: f64) -> HeuristicRule {
        HeuristicRule {
            signal: signal.to_string(),
            condition: condition.to_string(),
            bump,
            reason: format!("{signal}_triggered"),
        }
    }

    #[test]
    fn disposable_domain_bump_applies() {
        let mut features = FeatureVector::default();
        features.provider_is_disposable = 1.0;
        let heuristics = Heuristics {
            rules: vec![rule("domain_disposable", "provider_is_disposable", 0.20)],
        };
        let (total, hits) = evaluate(&features, &heuristics);
        assert_eq!(total, 0.20);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn threshold_condition_respects_operator() {
        let mut features = FeatureVector::default();
        features.bot_score = Some(45.0);
        let heuristics = Heuristics { rules: vec![rule("bot", "bot_score>=30", 0.15)] };
        let (total, _) = evaluate(&features, &heuristics);
        assert_eq!(total, 0.15);
    }

    #[test]
    fn signal_contributes_at_most_once() {
        let mut features = FeatureVector::default();
        features.digit_ratio = 0.9;
        let heuristics = Heuristics {
            rules: vec![
                rule("digits", "digit_ratio>=0.5", 0.05),
                rule("digits", "digit_ratio>=0.8", 0.10),
            ],
        };
        let (total, hits) = evaluate(&features, &heuristics);
        assert_eq!(total, 0.05);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn less_than_operator_matches_low_values() {
        let mut features = FeatureVector::default();
        features.tld_risk = 0.05;
        let heuristics = Heuristics { rules: vec![rule("low_tld_risk", "tld_risk<0.1", 0.05)] };
        let (total, _) = evaluate(&features, &heuristics);
        assert_eq!(total, 0.05);
    }

    #[test]
    fn total_is_capped_at_one() {
        let mut features = FeatureVector::default();
        features.digit_ratio = 1.0;
        features.provider_is_disposable = 1.0;
        let heuristics = Heuristics {
            rules: vec![
                rule("a", "digit_ratio>=0.5", 0.6),
                rule("b", "provider_is_disposable", 0.6),
            ],
        };
        let (total, _) = evaluate(&features, &heuristics);
        assert_eq!(total, 1.0);
    }
}
