//! Feature extraction from an email local-part and domain (§4.1).

use std::collections::HashSet;

use chrono::Datelike;

use crate::artifacts::{DisposableDomains, FeatureFlags, TldProfiles};
use crate::error::FraudError;
use crate::mx::MxLookupResult;
use crate::types::{FeatureVector, RequestContext};

const VOWELS: &str = "aeiou";

/// Plus-tag keywords treated as suspicious (§9.1 open question #2, resolved).
const SUSPICIOUS_PLUS_TAGS: &[&str] = &[
    "test", "spam", "temp", "fake", "trash", "junk", "disposable", "throwaway", "burner", "trial",
];

const GENERIC_BASE_TOKENS: &[&str] = &["user", "test", "admin", "account", "login", "member"];

/// Free mailbox providers (by registrable domain) used for `provider_is_free`.
const FREE_PROVIDERS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "icloud.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
];

/// Result of normalizing and splitting a raw email address.
pub struct NormalizedEmail {
    /// Local-part with plus-tag stripped, lower-cased: used for canonical
    /// feature extraction and Markov evaluation.
    pub local_canonical: String,
    /// Local-part as submitted (lower-cased, plus-tag retained): used for
    /// plus-addressing detection.
    pub local_original: String,
    pub domain: String,
    pub plus_tag: Option<String>,
}

/// Lower-case and split an email at the last `@`. Rejects anything that
/// isn't exactly one `@` with non-empty local-part and domain.
pub fn normalize(email: &str) -> Result<NormalizedEmail, FraudError> {
    let lower = email.trim().to_lowercase();
    if lower.is_empty() {
        return Err(FraudError::FormatInvalid("empty email".to_string()));
    }
    let at_count = lower.matches('@').count();
    if at_count != 1 {
        return Err(FraudError::FormatInvalid(format!(
            "expected exactly one '@', found {}",
            at_count
        )));
    }
    let idx = lower.rfind('@').expect("exactly one '@' checked above");
    let (local_original, domain_with_at) = lower.split_at(idx);
    let domain = &domain_with_at[1..];
    if local_original.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(FraudError::FormatInvalid(
            "empty local-part or malformed domain".to_string(),
        ));
    }

    let (local_canonical, plus_tag) = match local_original.find('+') {
        Some(plus_idx) => (
            local_original[..plus_idx].to_string(),
            Some(local_original[plus_idx + 1..].to_string()),
        ),
        None => (local_original.to_string(), None),
    };

    Ok(NormalizedEmail {
        local_canonical,
        local_original: local_original.to_string(),
        domain: domain.to_string(),
        plus_tag,
    })
}

/// Shannon entropy over character frequencies, normalized to `[0,1]` by
/// dividing by `log2(length)`.
pub fn shannon_entropy(s: &str) -> f64 {
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    if n <= 1 {
        return 0.0;
    }
    let mut counts: std::collections::HashMap<char, usize> = std::collections::HashMap::new();
    for c in &chars {
        *counts.entry(*c).or_insert(0) += 1;
    }
    let raw: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / n as f64;
            -p * p.log2()
        })
        .sum();
    let max = (n as f64).log2();
    if max <= 0.0 {
        0.0
    } else {
        (raw / max).clamp(0.0, 1.0)
    }
}

/// Entropy over consecutive character-pair transitions, normalized to `[0,1]`.
pub fn bigram_entropy(s: &str) -> f64 {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < 2 {
        return 0.0;
    }
    let pairs: Vec<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
    let n = pairs.len();
    let mut counts: std::collections::HashMap<(char, char), usize> =
        std::collections::HashMap::new();
    for p in &pairs {
        *counts.entry(*p).or_insert(0) += 1;
    }
    let raw: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / n as f64;
            -p * p.log2()
        })
        .sum();
    let max = (n as f64).log2();
    if max <= 0.0 {
        0.0
    } else {
        (raw / max).clamp(0.0, 1.0)
    }
}

fn is_vowel(c: char) -> bool {
    VOWELS.contains(c)
}

fn max_run<F: Fn(char) -> bool>(s: &str, pred: F) -> usize {
    let mut max = 0;
    let mut cur = 0;
    for c in s.chars() {
        if pred(c) {
            cur += 1;
            max = max.max(cur);
        } else {
            cur = 0;
        }
    }
    max
}

fn max_repeated_char_run(s: &str) -> usize {
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return 0;
    }
    let mut max = 1;
    let mut cur = 1;
    for w in chars.windows(2) {
        if w[0] == w[1] {
            cur += 1;
            max = max.max(cur);
        } else {
            cur = 1;
        }
    }
    max
}

/// Pronounceability heuristic: combines vowel ratio, consonant clustering,
/// repetition, digit/symbol density, impossible clusters, and vowel-less
/// segments into a single `[0,1]` score (1.0 = very pronounceable).
fn pronounceability(
    s: &str,
    vowel_ratio: f64,
    max_consonant_cluster: usize,
    repeated_char_ratio: f64,
    digit_ratio: f64,
    symbol_ratio: f64,
    impossible_clusters: usize,
    segments_without_vowels_ratio: f64,
) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut score = 1.0;
    // Ideal vowel ratio sits around 0.35-0.45; penalize distance from it.
    score -= (vowel_ratio - 0.4).abs().min(0.4);
    score -= (max_consonant_cluster.saturating_sub(2) as f64) * 0.15;
    score -= repeated_char_ratio * 0.3;
    score -= digit_ratio * 0.4;
    score -= symbol_ratio * 0.5;
    score -= (impossible_clusters as f64) * 0.2;
    score -= segments_without_vowels_ratio * 0.3;
    score.clamp(0.0, 1.0)
}

/// Consonant clusters that essentially never occur in pronounceable text.
const IMPOSSIBLE_CLUSTERS: &[&str] = &["qx", "xq", "jq", "qj", "zx", "xz", "vq", "qv"];

fn count_impossible_clusters(s: &str) -> usize {
    IMPOSSIBLE_CLUSTERS
        .iter()
        .map(|cluster| s.matches(cluster).count())
        .sum()
}

struct Segments {
    count: usize,
    avg_length: f64,
    longest_length: usize,
    without_vowels_ratio: f64,
    has_word_boundaries: bool,
}

fn analyze_segments(local_canonical: &str) -> Segments {
    let parts: Vec<&str> = local_canonical
        .split(|c: char| c == '.' || c == '_' || c == '-')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return Segments {
            count: 0,
            avg_length: 0.0,
            longest_length: 0,
            without_vowels_ratio: 0.0,
            has_word_boundaries: false,
        };
    }
    let lengths: Vec<usize> = parts.iter().map(|p| p.chars().count()).collect();
    let without_vowels = parts.iter().filter(|p| !p.chars().any(is_vowel)).count();
    Segments {
        count: parts.len(),
        avg_length: lengths.iter().sum::<usize>() as f64 / parts.len() as f64,
        longest_length: *lengths.iter().max().unwrap_or(&0),
        without_vowels_ratio: without_vowels as f64 / parts.len() as f64,
        has_word_boundaries: parts.len() > 1,
    }
}

/// Syllable count estimate: vowel groups, with a trailing silent `e` discount.
fn syllable_estimate(s: &str) -> f64 {
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return 0.0;
    }
    let mut groups = 0;
    let mut in_vowel = false;
    for c in &chars {
        let v = is_vowel(*c);
        if v && !in_vowel {
            groups += 1;
        }
        in_vowel = v;
    }
    if chars.last() == Some(&'e') && groups > 1 {
        groups -= 1;
    }
    groups.max(1) as f64
}

/// Sequential/digit-heavy trailing pattern detection (§4.1). Returns
/// `(confidence, is_plausible_birth_year)`.
pub fn sequential_pattern(local_canonical: &str, now_year: i32) -> (f64, bool) {
    let trailing_digits: String = local_canonical
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    if trailing_digits.is_empty() {
        return (0.0, false);
    }

    let base = &local_canonical[..local_canonical.len() - trailing_digits.len()];
    let is_birth_year = trailing_digits.len() == 4
        && trailing_digits
            .parse::<i32>()
            .map(|y| now_year - y >= 13 && now_year - y <= 100)
            .unwrap_or(false);

    if is_birth_year {
        return (0.0, true);
    }

    let len = trailing_digits.len() as f64;
    let leading_zeros = trailing_digits.chars().take_while(|c| *c == '0').count() as f64;
    let digit_ratio_of_local = trailing_digits.len() as f64 / local_canonical.len().max(1) as f64;
    let generic_base = GENERIC_BASE_TOKENS.contains(&base) || base.is_empty();

    let mut confidence = (len / 6.0).min(0.5);
    confidence += (leading_zeros / len.max(1.0)) * 0.15;
    confidence += digit_ratio_of_local * 0.25;
    if generic_base {
        confidence += 0.20;
    }

    (confidence.clamp(0.0, 1.0), false)
}

/// Dated pattern risk classification by temporal distance (§4.1).
pub fn dated_pattern_risk(year: i32, now_year: i32, has_month_or_full_date: bool) -> f64 {
    let delta = now_year - year;
    if delta < 0 {
        0.95
    } else if delta <= 2 {
        0.90
    } else if delta <= 12 {
        0.70
    } else if delta <= 65 {
        if has_month_or_full_date {
            0.675
        } else {
            0.20
        }
    } else if delta <= 100 {
        0.40
    } else {
        0.80
    }
}

/// Resolve `dated_pattern_risk`'s `(year, has_month_or_full_date)` inputs
/// from the same trailing-digit run `sequential_pattern` inspects. A
/// 4-digit run is a bare year; a longer one carries month/day digits ahead
/// of the year, so the trailing 4 digits are taken as the year.
fn dated_pattern_risk_for(local_canonical: &str, now_year: i32) -> Option<f64> {
    let trailing_digits: String = local_canonical
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    if trailing_digits.len() < 4 {
        return None;
    }
    let (year_str, has_month_or_full_date) = if trailing_digits.len() == 4 {
        (trailing_digits.as_str(), false)
    } else {
        (&trailing_digits[trailing_digits.len() - 4..], true)
    };
    let year: i32 = year_str.parse().ok()?;
    Some(dated_pattern_risk(year, now_year, has_month_or_full_date))
}

fn plus_tag_is_suspicious(tag: &str) -> bool {
    if tag.is_empty() {
        return false;
    }
    if tag.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = tag.to_lowercase();
    SUSPICIOUS_PLUS_TAGS.iter().any(|k| lower == *k)
}

fn registrable_domain(domain: &str) -> &str {
    domain
}

fn tld_of(domain: &str) -> &str {
    domain.rsplit('.').next().unwrap_or("")
}

/// Derive the full feature vector from a normalized email and context.
/// Markov fields (`ce_*`, `min_entropy`) are left `None` — filled by
/// `MarkovEnsemble` — and MX fields are left `None` until `apply_mx` runs.
/// `now_year` is threaded in rather than read from the clock so callers
/// (and tests) control birth-year plausibility math deterministically.
pub fn extract(
    normalized: &NormalizedEmail,
    context: Option<&RequestContext>,
    disposable: &DisposableDomains,
    tlds: &TldProfiles,
    flags: &FeatureFlags,
    now_year: i32,
) -> FeatureVector {
    let local = &normalized.local_canonical;
    let chars: Vec<char> = local.chars().collect();
    let length = chars.len();

    let digit_count = chars.iter().filter(|c| c.is_ascii_digit()).count();
    let symbol_count = chars
        .iter()
        .filter(|c| !c.is_ascii_alphanumeric())
        .count();
    let unique_chars: HashSet<char> = chars.iter().copied().collect();
    let vowel_count = chars.iter().filter(|c| is_vowel(**c)).count();
    let consonant_count = chars
        .iter()
        .filter(|c| c.is_ascii_alphabetic() && !is_vowel(**c))
        .count();

    let digit_ratio = ratio(digit_count, length);
    let symbol_ratio = ratio(symbol_count, length);
    let vowel_ratio = ratio(vowel_count, length);
    let consonant_ratio = ratio(consonant_count, length);
    let unique_char_ratio = ratio(unique_chars.len(), length);

    let max_digit_run = max_run(local, |c| c.is_ascii_digit());
    let max_consonant_cluster = max_run(local, |c| c.is_ascii_alphabetic() && !is_vowel(c));
    let max_vowel_cluster = max_run(local, is_vowel);
    let max_repeat = max_repeated_char_run(local);
    let repeated_char_ratio = if length > 0 {
        (max_repeat as f64 - 1.0).max(0.0) / length as f64
    } else {
        0.0
    };

    let impossible_clusters = count_impossible_clusters(local);
    let segments = analyze_segments(local);

    let entropy = shannon_entropy(local);
    let bg_entropy = if flags.ngram_analysis { bigram_entropy(local) } else { 0.0 };

    let (sequential_confidence, dated_pattern_risk_value) = if flags.pattern_check {
        let (confidence, _) = sequential_pattern(local, now_year);
        (confidence, dated_pattern_risk_for(local, now_year).unwrap_or(0.0))
    } else {
        (0.0, 0.0)
    };

    // Average gap (in characters) between consecutive vowels, normalized.
    let vowel_positions: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(_, c)| is_vowel(**c))
        .map(|(i, _)| i)
        .collect();
    let vowel_gap_ratio = if vowel_positions.len() >= 2 {
        let gaps: Vec<usize> = vowel_positions.windows(2).map(|w| w[1] - w[0]).collect();
        let avg_gap = gaps.iter().sum::<usize>() as f64 / gaps.len() as f64;
        (avg_gap / length.max(1) as f64).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let pronounce = pronounceability(
        local,
        vowel_ratio,
        max_consonant_cluster,
        repeated_char_ratio,
        digit_ratio,
        symbol_ratio,
        impossible_clusters,
        segments.without_vowels_ratio,
    );

    let (has_plus_addressing, plus_risk) = match &normalized.plus_tag {
        Some(tag) => (1.0, if plus_tag_is_suspicious(tag) { 1.0 } else { 0.0 }),
        None => (0.0, 0.0),
    };

    let domain = registrable_domain(&normalized.domain);
    let tld = tld_of(domain);
    let provider_is_free = if FREE_PROVIDERS.contains(&domain) { 1.0 } else { 0.0 };
    let provider_is_disposable = if disposable.domains.contains(domain) { 1.0 } else { 0.0 };
    let tld_risk = if flags.tld_risk_profiling {
        tlds.risk_by_tld.get(tld).copied().unwrap_or(0.0)
    } else {
        0.0
    };

    FeatureVector {
        length: length as f64,
        digit_count: digit_count as f64,
        digit_ratio,
        max_digit_run: max_digit_run as f64,
        symbol_count: symbol_count as f64,
        symbol_ratio,
        unique_char_ratio,
        entropy,
        bigram_entropy: bg_entropy,
        vowel_gap_ratio,

        pronounceability: pronounce,
        vowel_ratio,
        consonant_ratio,
        max_consonant_cluster: max_consonant_cluster as f64,
        max_vowel_cluster: max_vowel_cluster as f64,
        max_repeated_char_run: max_repeat as f64,
        repeated_char_ratio,
        syllable_estimate: syllable_estimate(local),
        impossible_cluster_count: impossible_clusters as f64,
        has_vowel: if vowel_count > 0 { 1.0 } else { 0.0 },

        has_word_boundaries: if segments.has_word_boundaries { 1.0 } else { 0.0 },
        segment_count: segments.count as f64,
        avg_segment_length: segments.avg_length,
        longest_segment_length: segments.longest_length as f64,
        segments_without_vowels_ratio: segments.without_vowels_ratio,

        sequential_confidence,
        dated_pattern_risk: dated_pattern_risk_value,

        ce_legit2: None,
        ce_fraud2: None,
        ce_diff2: None,
        ce_legit3: None,
        ce_fraud3: None,
        ce_diff3: None,
        min_entropy: None,
        abnormality_risk: 0.0,

        provider_is_free,
        provider_is_disposable,
        tld_risk,
        mx_has_records: None,
        mx_provider_bucket: None,

        bot_score: context.and_then(|c| c.bot_score),
        has_plus_addressing,
        plus_risk,

        invalid_email: false,
    }
}

/// Fill MX-derived features from a resolved (or absent) lookup result.
pub fn apply_mx(features: &mut FeatureVector, mx: Option<&MxLookupResult>) {
    match mx {
        Some(result) => {
            features.mx_has_records = Some(if result.records.is_empty() { 0.0 } else { 1.0 });
            features.mx_provider_bucket = Some(result.provider.bucket_id() as f64);
        }
        None => {
            features.mx_has_records = None;
            features.mx_provider_bucket = None;
        }
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Current UTC year, used for birth-year plausibility checks.
pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rejects_missing_at() {
        assert!(normalize("not-an-email").is_err());
    }

    #[test]
    fn normalize_rejects_multiple_at() {
        assert!(normalize("a@b@c.com").is_err());
    }

    #[test]
    fn normalize_strips_plus_tag_for_canonical() {
        let n = normalize("john.smith+test@gmail.com").unwrap();
        assert_eq!(n.local_canonical, "john.smith");
        assert_eq!(n.local_original, "john.smith+test");
        assert_eq!(n.plus_tag.as_deref(), Some("test"));
    }

    #[test]
    fn shannon_entropy_of_repeated_char_is_zero() {
        assert_eq!(shannon_entropy("aaaaaa"), 0.0);
    }

    #[test]
    fn shannon_entropy_of_varied_string_is_high() {
        assert!(shannon_entropy("qwerty456") > 0.7);
    }

    #[test]
    fn birth_year_is_exempt_from_sequential_pattern() {
        let year = current_year();
        let birth = year - 35;
        let (confidence, is_birth) = sequential_pattern(&format!("sarah{}", birth), year);
        assert!(is_birth);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn non_birth_trailing_digits_score_high_confidence() {
        let (confidence, is_birth) = sequential_pattern("user123", 2026);
        assert!(!is_birth);
        assert!(confidence >= 0.5, "confidence was {confidence}");
    }

    #[test]
    fn plus_tag_numeric_is_suspicious() {
        assert!(plus_tag_is_suspicious("12345"));
        assert!(plus_tag_is_suspicious("spam"));
        assert!(!plus_tag_is_suspicious("newsletter"));
    }

    #[test]
    fn dated_pattern_plausible_birth_year_is_low_risk() {
        let risk = dated_pattern_risk(1990, 2026, false);
        assert!((risk - 0.20).abs() < 1e-9);
    }

    #[test]
    fn dated_pattern_future_year_is_high_risk() {
        let risk = dated_pattern_risk(2030, 2026, false);
        assert!((risk - 0.95).abs() < 1e-9);
    }
}
