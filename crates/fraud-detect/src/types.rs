//! Data model: request, feature vector, artifacts, and result types.

use std::collections::HashMap;

use fraud_core::RequestId;
use serde::{Deserialize, Serialize};

/// Contextual request signals. Every field is optional — callers supply
/// whatever the surrounding HTTP/RPC layer has available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation id for tracing/persistence; assigned by the HTTP layer
    /// when absent from the caller's payload.
    pub request_id: Option<RequestId>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub asn: Option<u32>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub colo: Option<String>,
    pub bot_score: Option<f64>,
    pub verified_bot: Option<bool>,
    pub tls_ja4: Option<String>,
    pub protocol: Option<String>,
    pub consumer: Option<String>,
    pub flow: Option<String>,
    pub experiment_id: Option<String>,
}

/// Typed evaluation request — the sole entry point into the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub email: String,
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub consumer: Option<String>,
    #[serde(default)]
    pub flow: Option<String>,
}

/// Ternary decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Warn,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::Block => "block",
        }
    }
}

/// Precedence-ordered block reasons; lower `rank()` wins when multiple
/// signals would each independently justify a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    FormatInvalid,
    Disposable,
    Classification,
    Ood,
    Forest,
    Heuristic,
    Domain,
}

impl BlockReason {
    fn rank(&self) -> u8 {
        match self {
            Self::FormatInvalid => 0,
            Self::Disposable => 1,
            Self::Classification => 2,
            Self::Ood => 3,
            Self::Forest => 4,
            Self::Heuristic => 5,
            Self::Domain => 6,
        }
    }

    /// Pick the highest-precedence reason among candidates (lowest rank wins).
    pub fn highest_precedence(candidates: &[BlockReason]) -> Option<BlockReason> {
        candidates.iter().copied().min_by_key(|r| r.rank())
    }
}

/// A fixed, named feature schema. Nullable fields use `Option<f64>` and are
/// persisted as SQL `NULL`, never a stand-in `0.0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    // Statistical
    pub length: f64,
    pub digit_count: f64,
    pub digit_ratio: f64,
    pub max_digit_run: f64,
    pub symbol_count: f64,
    pub symbol_ratio: f64,
    pub unique_char_ratio: f64,
    pub entropy: f64,
    pub bigram_entropy: f64,
    pub vowel_gap_ratio: f64,

    // Linguistic
    pub pronounceability: f64,
    pub vowel_ratio: f64,
    pub consonant_ratio: f64,
    pub max_consonant_cluster: f64,
    pub max_vowel_cluster: f64,
    pub max_repeated_char_run: f64,
    pub repeated_char_ratio: f64,
    pub syllable_estimate: f64,
    pub impossible_cluster_count: f64,
    pub has_vowel: f64,

    // Structural
    pub has_word_boundaries: f64,
    pub segment_count: f64,
    pub avg_segment_length: f64,
    pub longest_segment_length: f64,
    pub segments_without_vowels_ratio: f64,

    // Pattern (§4.1 sequential/dated detection, consumed by the heuristic engine)
    pub sequential_confidence: f64,
    pub dated_pattern_risk: f64,

    // Markov (filled by MarkovEnsemble)
    pub ce_legit2: Option<f64>,
    pub ce_fraud2: Option<f64>,
    pub ce_diff2: Option<f64>,
    pub ce_legit3: Option<f64>,
    pub ce_fraud3: Option<f64>,
    pub ce_diff3: Option<f64>,
    pub min_entropy: Option<f64>,
    pub abnormality_risk: f64,

    // Domain
    pub provider_is_free: f64,
    pub provider_is_disposable: f64,
    pub tld_risk: f64,
    pub mx_has_records: Option<f64>,
    pub mx_provider_bucket: Option<f64>,

    // Context
    pub bot_score: Option<f64>,
    pub has_plus_addressing: f64,
    pub plus_risk: f64,

    /// Set when normalization rejected the input; short-circuits the pipeline.
    pub invalid_email: bool,
}

impl FeatureVector {
    /// Look up a feature by its stable schema name, for the forest's
    /// node-threshold comparisons. Unset/null features read as 0.0 with a
    /// caller-side warning on first mismatch (see `ForestEvaluator`).
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "length" => Some(self.length),
            "digit_count" => Some(self.digit_count),
            "digit_ratio" => Some(self.digit_ratio),
            "max_digit_run" => Some(self.max_digit_run),
            "symbol_count" => Some(self.symbol_count),
            "symbol_ratio" => Some(self.symbol_ratio),
            "unique_char_ratio" => Some(self.unique_char_ratio),
            "entropy" => Some(self.entropy),
            "bigram_entropy" => Some(self.bigram_entropy),
            "vowel_gap_ratio" => Some(self.vowel_gap_ratio),
            "pronounceability" => Some(self.pronounceability),
            "vowel_ratio" => Some(self.vowel_ratio),
            "consonant_ratio" => Some(self.consonant_ratio),
            "max_consonant_cluster" => Some(self.max_consonant_cluster),
            "max_vowel_cluster" => Some(self.max_vowel_cluster),
            "max_repeated_char_run" => Some(self.max_repeated_char_run),
            "repeated_char_ratio" => Some(self.repeated_char_ratio),
            "syllable_estimate" => Some(self.syllable_estimate),
            "impossible_cluster_count" => Some(self.impossible_cluster_count),
            "has_vowel" => Some(self.has_vowel),
            "has_word_boundaries" => Some(self.has_word_boundaries),
            "segment_count" => Some(self.segment_count),
            "avg_segment_length" => Some(self.avg_segment_length),
            "longest_segment_length" => Some(self.longest_segment_length),
            "segments_without_vowels_ratio" => Some(self.segments_without_vowels_ratio),
            "sequential_confidence" => Some(self.sequential_confidence),
            "dated_pattern_risk" => Some(self.dated_pattern_risk),
            "ce_legit2" => self.ce_legit2,
            "ce_fraud2" => self.ce_fraud2,
            "ce_diff2" => self.ce_diff2,
            "ce_legit3" => self.ce_legit3,
            "ce_fraud3" => self.ce_fraud3,
            "ce_diff3" => self.ce_diff3,
            "min_entropy" => self.min_entropy,
            "abnormality_risk" => Some(self.abnormality_risk),
            "provider_is_free" => Some(self.provider_is_free),
            "provider_is_disposable" => Some(self.provider_is_disposable),
            "tld_risk" => Some(self.tld_risk),
            "mx_has_records" => self.mx_has_records,
            "mx_provider_bucket" => self.mx_provider_bucket,
            "bot_score" => self.bot_score,
            "has_plus_addressing" => Some(self.has_plus_addressing),
            "plus_risk" => Some(self.plus_risk),
            _ => None,
        }
    }

    /// Full export for persistence; nulls stay `None` rather than becoming 0.
    pub fn as_map(&self) -> HashMap<String, Option<f64>> {
        let names = [
            "length", "digit_count", "digit_ratio", "max_digit_run", "symbol_count",
            "symbol_ratio", "unique_char_ratio", "entropy", "bigram_entropy", "vowel_gap_ratio",
            "pronounceability", "vowel_ratio", "consonant_ratio", "max_consonant_cluster",
            "max_vowel_cluster", "max_repeated_char_run", "repeated_char_ratio",
            "syllable_estimate", "impossible_cluster_count", "has_vowel", "has_word_boundaries",
            "segment_count", "avg_segment_length", "longest_segment_length",
            "segments_without_vowels_ratio", "sequential_confidence", "dated_pattern_risk",
            "ce_legit2", "ce_fraud2", "ce_diff2", "ce_legit3",
            "ce_fraud3", "ce_diff3", "min_entropy", "abnormality_risk", "provider_is_free",
            "provider_is_disposable", "tld_risk", "mx_has_records", "mx_provider_bucket",
            "bot_score", "has_plus_addressing", "plus_risk",
        ];
        names.iter().map(|n| (n.to_string(), self.get(n))).collect()
    }
}

/// Calibration metadata attached to the result, describing whether and how
/// much Platt calibration boosted the raw Markov confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationMeta {
    pub version: String,
    pub created_at: String,
    pub calibration_used: bool,
    pub calibration_boosted: bool,
    pub boost_amount: f64,
}

/// Fingerprint derived from request-level identity signals, never raw PII.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
    pub country: Option<String>,
    pub asn: Option<u32>,
}

/// Signals record explaining the verdict — the feature vector plus derived
/// lane outputs and reasoning tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signals {
    pub features: FeatureVector,
    pub classification_risk: f64,
    pub abnormality_risk: f64,
    pub heuristic_risk: f64,
    pub forest_risk: Option<f64>,
    pub domain_risk: f64,
    pub whitelist_reduction: f64,
    pub ensemble_reason: String,
    pub pattern_family: Option<String>,
    pub pattern_confidence: Option<f64>,
    pub degraded_model: bool,
    pub heuristic_reasons: Vec<String>,
}

/// Final evaluation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub valid: bool,
    pub decision: Decision,
    pub risk_score: f64,
    pub signals: Signals,
    pub block_reason: Option<BlockReason>,
    pub fingerprint: Option<Fingerprint>,
    pub calibration: CalibrationMeta,
    pub model_version: String,
    pub latency_ms: f64,
}
