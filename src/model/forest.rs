//! Random forest regressor
//!
//! Bootstrap-aggregated regression trees grown on squared-error splits.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::{EvError, ForestConfig, Result};

/// Number of candidate features examined at each split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// Log2 of n_features
    Log2,
    /// Fraction of n_features
    Fraction(f64),
    /// Fixed number
    Fixed(usize),
    /// All features
    All,
}

impl MaxFeatures {
    fn resolve(&self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().ceil() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
            MaxFeatures::Fixed(n) => *n,
            MaxFeatures::All => n_features,
        };
        n.clamp(1, n_features.max(1))
    }
}

/// Regression tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

/// Growth limits shared by every tree of a forest
#[derive(Debug, Clone, Copy)]
struct GrowthParams {
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_features: usize,
}

/// Best split found for one node
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    /// Reduction in sum of squared errors
    gain: f64,
}

/// A single regression tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
}

impl RegressionTree {
    fn grow(
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        params: &GrowthParams,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> Self {
        RegressionTree {
            root: build_node(x, y, indices, 0, params, rng, importances),
        }
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    node = if row[*feature_idx] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn node_depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => 1 + node_depth(left).max(node_depth(right)),
            }
        }
        node_depth(&self.root)
    }

    pub fn n_leaves(&self) -> usize {
        fn count(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => count(left) + count(right),
            }
        }
        count(&self.root)
    }

    /// Training rows that reached the root
    pub fn n_samples(&self) -> usize {
        match &self.root {
            TreeNode::Leaf { n_samples, .. } | TreeNode::Split { n_samples, .. } => *n_samples,
        }
    }
}

fn build_node(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    depth: usize,
    params: &GrowthParams,
    rng: &mut StdRng,
    importances: &mut [f64],
) -> TreeNode {
    let n_samples = indices.len();
    let value = indices.iter().map(|&i| y[i]).sum::<f64>() / n_samples.max(1) as f64;

    let should_stop = n_samples < params.min_samples_split
        || n_samples < 2 * params.min_samples_leaf
        || params.max_depth.map_or(false, |d| depth >= d)
        || is_constant(y, indices);

    if should_stop {
        return TreeNode::Leaf { value, n_samples };
    }

    let Some(split) = find_best_split(x, y, indices, params, rng) else {
        return TreeNode::Leaf { value, n_samples };
    };

    let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| x[[i, split.feature_idx]] <= split.threshold);

    importances[split.feature_idx] += split.gain;

    let left = Box::new(build_node(
        x,
        y,
        &left_indices,
        depth + 1,
        params,
        rng,
        importances,
    ));
    let right = Box::new(build_node(
        x,
        y,
        &right_indices,
        depth + 1,
        params,
        rng,
        importances,
    ));

    TreeNode::Split {
        feature_idx: split.feature_idx,
        threshold: split.threshold,
        left,
        right,
        n_samples,
    }
}

fn is_constant(y: &Array1<f64>, indices: &[usize]) -> bool {
    let first = y[indices[0]];
    indices.iter().all(|&i| (y[i] - first).abs() < 1e-10)
}

/// Scan a random subset of features for the split with the largest SSE reduction
fn find_best_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    params: &GrowthParams,
    rng: &mut StdRng,
) -> Option<SplitCandidate> {
    let n_features = x.ncols();
    let n = indices.len() as f64;

    let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n;

    let candidates = index::sample(rng, n_features, params.max_features.min(n_features));

    let mut best: Option<SplitCandidate> = None;
    let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(indices.len());

    for feature_idx in candidates.iter() {
        pairs.clear();
        pairs.extend(indices.iter().map(|&i| (x[[i, feature_idx]], y[i])));
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;

        for split_at in 1..pairs.len() {
            let (prev_x, prev_y) = pairs[split_at - 1];
            left_sum += prev_y;
            left_sq += prev_y * prev_y;

            let next_x = pairs[split_at].0;
            if next_x <= prev_x {
                continue;
            }

            let left_count = split_at;
            let right_count = pairs.len() - split_at;
            if left_count < params.min_samples_leaf || right_count < params.min_samples_leaf {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let child_sse = (left_sq - left_sum * left_sum / left_count as f64)
                + (right_sq - right_sum * right_sum / right_count as f64);
            let gain = parent_sse - child_sse;

            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature_idx,
                    threshold: (prev_x + next_x) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}

/// Random forest regression model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub random_state: u64,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl Default for RandomForestRegressor {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForestRegressor {
    pub fn new(n_estimators: usize) -> Self {
        RandomForestRegressor {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            random_state: 42,
            n_features: 0,
            feature_importances: Vec::new(),
        }
    }

    /// Create an unfitted forest from configuration
    pub fn from_config(config: &ForestConfig, seed: u64) -> Self {
        RandomForestRegressor {
            n_estimators: config.n_estimators,
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split,
            min_samples_leaf: config.min_samples_leaf,
            max_features: config.max_features,
            random_state: seed,
            ..Self::new(config.n_estimators)
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit the forest to a feature matrix and target vector
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(EvError::Training(format!(
                "feature matrix has {} rows but target has {} values",
                n_samples,
                y.len()
            )));
        }
        if n_samples < 2 {
            return Err(EvError::Training(format!(
                "degenerate feature matrix: {} row(s), need at least 2",
                n_samples
            )));
        }
        if n_features == 0 {
            return Err(EvError::Training("feature matrix has no columns".to_string()));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(EvError::Training(
                "feature matrix or target contains non-finite values".to_string(),
            ));
        }
        if self.n_estimators == 0 {
            return Err(EvError::Training("n_estimators must be at least 1".to_string()));
        }

        let params = GrowthParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split.max(2),
            min_samples_leaf: self.min_samples_leaf.max(1),
            max_features: self.max_features.resolve(n_features),
        };

        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut trees = Vec::with_capacity(self.n_estimators);
        let mut importances = vec![0.0; n_features];

        for _ in 0..self.n_estimators {
            let sample: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();

            let mut tree_importances = vec![0.0; n_features];
            let tree =
                RegressionTree::grow(x, y, &sample, &params, &mut rng, &mut tree_importances);

            let total: f64 = tree_importances.iter().sum();
            if total > 0.0 {
                for (acc, imp) in importances.iter_mut().zip(&tree_importances) {
                    *acc += imp / total;
                }
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|imp| *imp /= total);
        }

        log::debug!(
            "Fitted {} trees on {} rows x {} features (mean depth {:.1})",
            trees.len(),
            n_samples,
            n_features,
            trees.iter().map(|t| t.depth() as f64).sum::<f64>() / trees.len() as f64
        );

        self.trees = trees;
        self.n_features = n_features;
        self.feature_importances = importances;
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Normalised impurity-based importances, one per input column
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }
}

impl Regressor for RandomForestRegressor {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if self.trees.is_empty() {
            return Err(EvError::Training("random forest has not been fitted".to_string()));
        }
        if row.len() != self.n_features {
            return Err(EvError::SchemaMismatch(format!(
                "forest expects {} features, got {}",
                self.n_features,
                row.len()
            )));
        }

        let sum: f64 = self.trees.iter().map(|tree| tree.predict_row(row)).sum();
        Ok(sum / self.trees.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fits_step_function() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![10.0, 10.0, 10.0, 50.0, 50.0, 50.0];

        let mut forest = RandomForestRegressor::new(25);
        forest.fit(&x, &y).unwrap();

        let low = forest.predict_row(&[1.5]).unwrap();
        let high = forest.predict_row(&[5.5]).unwrap();
        assert!(low < 30.0, "low side predicted {}", low);
        assert!(high > 30.0, "high side predicted {}", high);
    }

    #[test]
    fn test_region_indicator_separates_targets() {
        // year, month, Region_A, Region_B
        let x = array![
            [2020.0, 1.0, 1.0, 0.0],
            [2020.0, 2.0, 1.0, 0.0],
            [2020.0, 3.0, 1.0, 0.0],
            [2020.0, 1.0, 0.0, 1.0],
            [2020.0, 2.0, 0.0, 1.0],
            [2020.0, 3.0, 0.0, 1.0],
        ];
        let y = array![1000.0, 1010.0, 1020.0, 5.0, 6.0, 7.0];

        let mut forest = RandomForestRegressor::new(50).with_random_state(7);
        forest.fit(&x, &y).unwrap();

        let a = forest.predict_row(&[2020.0, 2.0, 1.0, 0.0]).unwrap();
        let b = forest.predict_row(&[2020.0, 2.0, 0.0, 1.0]).unwrap();
        assert!(a > b, "region A ({}) should exceed region B ({})", a, b);

        let importances = forest.feature_importances();
        assert_eq!(importances.len(), 4);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[2] + importances[3] > importances[0]);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 0.0]];
        let y = array![3.0, 8.0, 2.0, 9.0, 4.0];

        let mut a = RandomForestRegressor::new(10).with_max_features(MaxFeatures::Sqrt);
        let mut b = RandomForestRegressor::new(10).with_max_features(MaxFeatures::Sqrt);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        let preds_a = a.predict(&x).unwrap();
        let preds_b = b.predict(&x).unwrap();
        assert_eq!(preds_a, preds_b);
    }

    #[test]
    fn test_single_row_is_degenerate() {
        let x = array![[2020.0, 1.0, 1.0]];
        let y = array![100.0];

        let mut forest = RandomForestRegressor::new(5);
        let err = forest.fit(&x, &y).unwrap_err();
        assert!(matches!(err, EvError::Training(_)));
        assert!(!forest.is_fitted());
    }

    #[test]
    fn test_rejects_non_finite_and_mismatched_input() {
        let mut forest = RandomForestRegressor::new(5);

        let x = array![[1.0], [f64::NAN]];
        let y = array![1.0, 2.0];
        assert!(matches!(forest.fit(&x, &y), Err(EvError::Training(_))));

        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0, 3.0];
        assert!(matches!(forest.fit(&x, &y), Err(EvError::Training(_))));
    }

    #[test]
    fn test_predict_checks_width_and_fit_state() {
        let forest = RandomForestRegressor::new(3);
        assert!(matches!(forest.predict_row(&[1.0]), Err(EvError::Training(_))));

        let mut forest = RandomForestRegressor::new(3);
        forest.fit(&array![[1.0], [2.0], [3.0]], &array![1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            forest.predict_row(&[1.0, 2.0]),
            Err(EvError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_max_depth_limits_trees() {
        let x = Array2::from_shape_fn((32, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(32, |i| (i * i) as f64);

        let mut forest = RandomForestRegressor::new(5).with_max_depth(3);
        forest.fit(&x, &y).unwrap();

        for tree in forest.trees() {
            assert!(tree.depth() <= 4);
            assert!(tree.n_leaves() <= 8);
            assert_eq!(tree.n_samples(), 32);
        }
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::All.resolve(10), 10);
        assert_eq!(MaxFeatures::Sqrt.resolve(10), 4);
        assert_eq!(MaxFeatures::Log2.resolve(8), 3);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(10), 5);
        assert_eq!(MaxFeatures::Fixed(50).resolve(10), 10);
        assert_eq!(MaxFeatures::Fixed(0).resolve(10), 1);
    }
}
