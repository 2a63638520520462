//! WhitelistEngine (§4.5): exact/regex/pattern-family matching and the
//! pattern-family normalization tokens resolved in §9.1.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::artifacts::{GlobalSettings, Whitelist, WhitelistEntry, WhitelistEntryType};

const COMMON_NAMES: &[&str] = &[
    "john", "jane", "james", "mary", "robert", "patricia", "michael", "jennifer", "william",
    "linda", "david", "elizabeth", "richard", "barbara", "joseph", "susan", "thomas", "jessica",
    "smith", "johnson", "williams", "brown", "jones", "garcia", "miller", "davis", "rodriguez",
    "martinez", "chen", "wong", "kumar", "patel", "singh",
];

fn is_plausible_year(n: u32, current_year: u32) -> bool {
    let age = current_year as i64 - n as i64;
    (13..=100).contains(&age) || n == current_year + 1
}

/// Classify one `.`/`_`/`-`-delimited local-part segment into its
/// pattern-family token.
fn classify_segment(segment: &str, current_year: u32) -> &'static str {
    let all_digits = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit());
    let all_alpha = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphabetic());

    if all_digits {
        let len = segment.len();
        if len <= 2 {
            return "NUM";
        }
        if len <= 4 {
            if let Ok(n) = segment.parse::<u32>() {
                if is_plausible_year(n, current_year) {
                    return "YEAR";
                }
            }
            return "NUM";
        }
        return "LONGNUM";
    }

    if all_alpha {
        if segment.len() <= 3 {
            return "SHORT";
        }
        if COMMON_NAMES.contains(&segment.to_ascii_lowercase().as_str()) {
            return "NAME";
        }
        return "WORD";
    }

    "MIXED"
}

/// Tokenize a local part into its pattern family string and a confidence
/// equal to the fraction of segments that were classified (non-empty).
pub fn pattern_family(local_part: &str, current_year: u32) -> (String, f64) {
    let mut tokens = Vec::new();
    let mut separators = Vec::new();
    let mut current = String::new();

    for c in local_part.chars() {
        if matches!(c, '.' | '_' | '-') {
            tokens.push(current.clone());
            separators.push(c);
            current.clear();
        } else {
            current.push(c);
        }
    }
    tokens.push(current);

    let total = tokens.len().max(1);
    let mut matched = 0usize;
    let mut family = String::new();
    for (i, segment) in tokens.iter().enumerate() {
        if !segment.is_empty() {
            matched += 1;
        }
        family.push_str(classify_segment(segment, current_year));
        if i < separators.len() {
            family.push(separators[i]);
        }
    }

    (family, matched as f64 / total as f64)
}

static EMAIL_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<local>[^@]+)@(?P<domain>.+)$").unwrap());

fn split_email(email: &str) -> Option<(&str, &str)> {
    let caps = EMAIL_SPLIT.captures(email)?;
    let local = caps.name("local")?.as_str();
    let domain = caps.name("domain")?.as_str();
    Some((local, domain))
}

fn entry_is_active(entry: &WhitelistEntry) -> bool {
    if !entry.enabled {
        return false;
    }
    match entry.expires_at {
        Some(expiry) => expiry > Utc::now(),
        None => true,
    }
}

static COMPILED_PATTERNS: Lazy<DashMap<String, Option<Arc<Regex>>>> = Lazy::new(DashMap::new);

/// Regex entries are recompiled on artifact load otherwise, which is wasteful
/// on the hot path since whitelist patterns rarely change between refreshes.
fn compiled_pattern(pattern: &str) -> Option<Arc<Regex>> {
    if let Some(cached) = COMPILED_PATTERNS.get(pattern) {
        return cached.clone();
    }
    let compiled = Regex::new(pattern).ok().map(Arc::new);
    COMPILED_PATTERNS.insert(pattern.to_string(), compiled.clone());
    compiled
}

fn entry_matches(entry: &WhitelistEntry, email: &str, local: &str, domain: &str, family: &str) -> bool {
    match entry.entry_type {
        WhitelistEntryType::ExactEmail => email.eq_ignore_ascii_case(&entry.pattern),
        WhitelistEntryType::ExactDomain => domain.eq_ignore_ascii_case(&entry.pattern),
        WhitelistEntryType::LocalPartRegex => {
            compiled_pattern(&entry.pattern).is_some_and(|re| re.is_match(local))
        }
        WhitelistEntryType::FullEmailRegex => {
            compiled_pattern(&entry.pattern).is_some_and(|re| re.is_match(email))
        }
        WhitelistEntryType::PatternFamily => entry.pattern == family,
    }
}

/// Compute the whitelist risk reduction for `email`, capped at
/// `globalSettings.maxReduction`.
pub fn evaluate(
    email: &str,
    whitelist: &Whitelist,
    settings: &GlobalSettings,
    current_year: u32,
) -> f64 {
    let Some((local, domain)) = split_email(email) else {
        return 0.0;
    };
    let (family, _) = pattern_family(local, current_year);

    let best = whitelist
        .entries
        .iter()
        .filter(|e| entry_is_active(e))
        .filter(|e| entry_matches(e, email, local, domain, &family))
        .map(|e| e.confidence)
        .fold(0.0_f64, f64::max);

    best.min(settings.max_reduction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_word_dot_year() {
        let (family, confidence) = pattern_family("john.1990", 2026);
        assert_eq!(family, "WORD.YEAR");
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn classifies_short_segment() {
        let (family, _) = pattern_family("ab", 2026);
        assert_eq!(family, "SHORT");
    }

    #[test]
    fn classifies_long_digit_run_as_longnum() {
        let (family, _) = pattern_family("x.12345", 2026);
        assert_eq!(family, "SHORT.LONGNUM");
    }

    #[test]
    fn non_plausible_four_digit_is_num_not_year() {
        let (family, _) = pattern_family("x.9999", 2026);
        assert_eq!(family, "SHORT.NUM");
    }

    #[test]
    fn exact_email_match_caps_at_max_reduction() {
        let whitelist = Whitelist {
            entries: vec![WhitelistEntry {
                entry_type: WhitelistEntryType::ExactEmail,
                pattern: "trusted@example.com".to_string(),
                confidence: 0.9,
                enabled: true,
                expires_at: None,
            }],
        };
        let settings = GlobalSettings { max_reduction: 0.4 };
        let reduction = evaluate("trusted@example.com", &whitelist, &settings, 2026);
        assert_eq!(reduction, 0.4);
    }

    #[test]
    fn expired_entry_is_ignored() {
        let whitelist = Whitelist {
            entries: vec![WhitelistEntry {
                entry_type: WhitelistEntryType::ExactDomain,
                pattern: "example.com".to_string(),
                confidence: 0.5,
                enabled: true,
                expires_at: Some(Utc::now() - chrono::Duration::days(1)),
            }],
        };
        let settings = GlobalSettings { max_reduction: 0.4 };
        let reduction = evaluate("user@example.com", &whitelist, &settings, 2026);
        assert_eq!(reduction, 0.0);
    }

    #[test]
    fn pattern_family_entry_matches_classified_local_part() {
        let whitelist = Whitelist {
            entries: vec![WhitelistEntry {
                entry_type: WhitelistEntryType::PatternFamily,
                pattern: "WORD.NUM".to_string(),
                confidence: 0.2,
                enabled: true,
                expires_at: None,
            }],
        };
        let settings = GlobalSettings { max_reduction: 0.4 };
        let reduction = evaluate("smith.42@example.com", &whitelist, &settings, 2026);
        assert_eq!(reduction, 0.2);
    }
}
