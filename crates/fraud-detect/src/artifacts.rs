//! Artifact types: the immutable, hot-reloadable configuration and model
//! objects the scoring pipeline reads from the `ArtifactCache`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One Markov n-gram model (either legit or fraud, order 2 or 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkovModel {
    pub order: u8,
    pub states: HashMap<String, MarkovState>,
    pub training_count: u64,
    #[serde(default)]
    pub ce_history: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkovState {
    pub counts: HashMap<char, u32>,
    pub total: u32,
}

impl MarkovModel {
    pub const MAX_CE_HISTORY: usize = 1000;

    pub fn record_ce(&mut self, value: f64) {
        if self.ce_history.len() >= Self::MAX_CE_HISTORY {
            self.ce_history.remove(0);
        }
        self.ce_history.push(value);
    }
}

/// A forest tree node: leaf or internal split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum TreeNode {
    #[serde(rename = "l")]
    Leaf { v: f64 },
    #[serde(rename = "n")]
    Internal {
        f: String,
        v: f64,
        l: Box<TreeNode>,
        r: Box<TreeNode>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibration {
    pub version: String,
    pub created_at: String,
    pub intercept: f64,
    pub coef: f64,
    #[serde(default)]
    pub feature_order: Vec<String>,
    pub samples: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForestConfig {
    pub max_depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestMeta {
    pub version: String,
    pub features: Vec<String>,
    pub tree_count: u32,
    pub calibration: Option<Calibration>,
    #[serde(default)]
    pub config: ForestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub meta: ForestMeta,
    pub forest: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub warn: f64,
    pub block: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { warn: 0.30, block: 0.35 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OodThresholds {
    pub warn_zone_min: f64,
    pub max_risk: f64,
    pub warn_threshold: f64,
    pub block_threshold: f64,
}

impl Default for OodThresholds {
    fn default() -> Self {
        Self {
            warn_zone_min: 0.35,
            max_risk: 0.65,
            warn_threshold: 3.8,
            block_threshold: 5.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleThresholds {
    pub agree: f64,
    pub override3: f64,
    pub override_ratio: f64,
    pub gibberish_entropy: f64,
    pub gibberish2_min: f64,
}

impl Default for EnsembleThresholds {
    fn default() -> Self {
        Self {
            agree: 0.3,
            override3: 0.5,
            override_ratio: 1.5,
            gibberish_entropy: 6.0,
            gibberish2_min: 0.2,
        }
    }
}

/// Per-lane kill switches (§6.6). Each flag gates exactly one stage in
/// `FraudDetector::evaluate_inner`; disabling one makes that stage
/// contribute `0` to the combined risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub mx_check: bool,
    #[serde(default = "default_true")]
    pub disposable_check: bool,
    #[serde(default = "default_true")]
    pub pattern_check: bool,
    #[serde(default = "default_true")]
    pub ngram_analysis: bool,
    #[serde(default = "default_true")]
    pub tld_risk_profiling: bool,
    #[serde(default = "default_true")]
    pub markov_chain: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            mx_check: true,
            disposable_check: true,
            pattern_check: true,
            ngram_analysis: true,
            tld_risk_profiling: true,
            markov_chain: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalSettings {
    #[serde(default = "default_max_reduction")]
    pub max_reduction: f64,
}

fn default_max_reduction() -> f64 {
    0.4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub risk_thresholds: RiskThresholds,
    pub ood: OodThresholds,
    pub ensemble_thresholds: EnsembleThresholds,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    pub calibration: Option<Calibration>,
    #[serde(default)]
    pub global_settings: GlobalSettings,
    #[serde(default)]
    pub version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            risk_thresholds: RiskThresholds::default(),
            ood: OodThresholds::default(),
            ensemble_thresholds: EnsembleThresholds::default(),
            feature_flags: FeatureFlags::default(),
            calibration: None,
            global_settings: GlobalSettings::default(),
            version: "unversioned".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicRule {
    pub signal: String,
    pub condition: String,
    pub bump: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Heuristics {
    pub rules: Vec<HeuristicRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistEntryType {
    ExactEmail,
    ExactDomain,
    LocalPartRegex,
    FullEmailRegex,
    PatternFamily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    #[serde(rename = "type")]
    pub entry_type: WhitelistEntryType,
    pub pattern: String,
    pub confidence: f64,
    pub enabled: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Whitelist {
    pub entries: Vec<WhitelistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisposableDomains {
    pub domains: std::collections::HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TldProfiles {
    /// tld (without leading dot) -> risk in [0,1]
    pub risk_by_tld: HashMap<String, f64>,
}
