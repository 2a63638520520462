//! ForestEvaluator (§4.3): iterative decision-tree traversal with a depth
//! cap, mean-leaf-probability scoring, and optional Platt calibration.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::artifacts::{Calibration, RandomForest, TreeNode};
use crate::error::{FraudError, Result};
use crate::types::FeatureVector;

const HARD_DEPTH_CAP: u32 = 50;

static LOGGED_MISSING_FEATURE: AtomicBool = AtomicBool::new(false);

fn traverse(node: &TreeNode, features: &FeatureVector, max_depth: u32) -> f64 {
    let mut current = node;
    let mut depth = 0u32;
    loop {
        match current {
            TreeNode::Leaf { v } => return *v,
            TreeNode::Internal { f, v, l, r } => {
                if depth >= max_depth {
                    return leaf_probability_estimate(current);
                }
                let value = features.get(f).unwrap_or_else(|| {
                    if !LOGGED_MISSING_FEATURE.swap(true, Ordering::Relaxed) {
                        warn!(feature = %f, "forest node references unknown feature, treating as 0");
                    }
                    0.0
                });
                current = if value <= *v { l.as_ref() } else { r.as_ref() };
                depth += 1;
            }
        }
    }
}

/// When the depth cap is hit before reaching a leaf, estimate the
/// subtree's probability as the mean of its reachable leaves.
fn leaf_probability_estimate(node: &TreeNode) -> f64 {
    fn collect(node: &TreeNode, acc: &mut Vec<f64>) {
        match node {
            TreeNode::Leaf { v } => acc.push(*v),
            TreeNode::Internal { l, r, .. } => {
                collect(l, acc);
                collect(r, acc);
            }
        }
    }
    let mut leaves = Vec::new();
    collect(node, &mut leaves);
    if leaves.is_empty() {
        0.0
    } else {
        leaves.iter().sum::<f64>() / leaves.len() as f64
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Validates a loaded calibration's direction; rejects `coef <= 0` at load
/// time rather than silently inverting scores.
pub fn validate_calibration(calibration: &Calibration) -> Result<()> {
    if calibration.coef <= 0.0 {
        return Err(FraudError::CalibrationInvalid(format!(
            "coef must be > 0, got {}",
            calibration.coef
        )));
    }
    Ok(())
}

/// A validated forest ready for scoring; calibration (if any) has already
/// passed `validate_calibration`.
pub struct ForestEvaluator<'a> {
    forest: &'a RandomForest,
    max_depth: u32,
}

impl<'a> ForestEvaluator<'a> {
    pub fn new(forest: &'a RandomForest) -> Result<Self> {
        if let Some(cal) = &forest.meta.calibration {
            validate_calibration(cal)?;
        }
        let max_depth = forest
            .meta
            .config
            .max_depth
            .unwrap_or(HARD_DEPTH_CAP)
            .min(HARD_DEPTH_CAP);
        Ok(Self { forest, max_depth })
    }

    /// Mean leaf probability across all trees, in `[0,1]`.
    pub fn raw_score(&self, features: &FeatureVector) -> f64 {
        if self.forest.forest.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .forest
            .forest
            .iter()
            .map(|tree| traverse(tree, features, self.max_depth))
            .sum();
        sum / self.forest.forest.len() as f64
    }

    /// Raw score with Platt calibration applied, if the forest carries one.
    pub fn calibrated_score(&self, features: &FeatureVector) -> f64 {
        let raw = self.raw_score(features);
        match &self.forest.meta.calibration {
            Some(cal) => sigmoid(cal.intercept + cal.coef * raw),
            None => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{Calibration, ForestConfig, ForestMeta};

    fn leaf(v: f64) -> TreeNode {
        TreeNode::Leaf { v }
    }

    fn split(f: &str, v: f64, l: TreeNode, r: TreeNode) -> TreeNode {
        TreeNode::Internal { f: f.to_string(), v, l: Box::new(l), r: Box::new(r) }
    }

    fn forest_with(trees: Vec<TreeNode>, calibration: Option<Calibration>) -> RandomForest {
        RandomForest {
            meta: ForestMeta {
                version: "test".to_string(),
                features: vec!["length".to_string()],
                tree_count: trees.len() as u32,
                calibration,
                config: ForestConfig { max_depth: Some(10) },
            },
            forest: trees,
        }
    }

    #[test]
    fn traverses_left_on_le_threshold() {
        let tree = split("length", 5.0, leaf(0.1), leaf(0.9));
        let forest = forest_with(vec![tree], None);
        let eval = ForestEvaluator::new(&forest).unwrap();
        let mut features = FeatureVector::default();
        features.length = 3.0;
        assert_eq!(eval.raw_score(&features), 0.1);
    }

    #[test]
    fn traverses_right_above_threshold() {
        let tree = split("length", 5.0, leaf(0.1), leaf(0.9));
        let forest = forest_with(vec![tree], None);
        let eval = ForestEvaluator::new(&forest).unwrap();
        let mut features = FeatureVector::default();
        features.length = 9.0;
        assert_eq!(eval.raw_score(&features), 0.9);
    }

    #[test]
    fn mean_across_trees() {
        let forest = forest_with(vec![leaf(0.2), leaf(0.8)], None);
        let eval = ForestEvaluator::new(&forest).unwrap();
        assert_eq!(eval.raw_score(&FeatureVector::default()), 0.5);
    }

    #[test]
    fn rejects_inverted_calibration() {
        let cal = Calibration {
            version: "v1".to_string(),
            created_at: "2026-01-01".to_string(),
            intercept: 0.0,
            coef: -1.0,
            feature_order: vec![],
            samples: None,
        };
        let forest = forest_with(vec![leaf(0.5)], Some(cal));
        assert!(ForestEvaluator::new(&forest).is_err());
    }

    #[test]
    fn missing_feature_treated_as_zero() {
        let tree = split("nonexistent_feature", 0.5, leaf(0.1), leaf(0.9));
        let forest = forest_with(vec![tree], None);
        let eval = ForestEvaluator::new(&forest).unwrap();
        assert_eq!(eval.raw_score(&FeatureVector::default()), 0.1);
    }
}
