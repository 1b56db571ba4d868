//! Regression tree (squared-error criterion)
//!
//! Shared by the random forest and the gradient boosting regressor. Splits are
//! found by sorting each candidate feature once per node and sweeping running
//! sums, so a node costs `O(n log n)` per feature.

use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2};
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
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

impl TreeNode {
    fn predict_row(&self, row: ndarray::ArrayView1<f64>) -> f64 {
        let mut node = self;
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
                    node = if row[*feature_idx] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Best split candidate for one feature: (feature, threshold, impurity decrease)
type SplitCandidate = (usize, f64, f64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeRegressor {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split; `None` examines all of them
    pub max_features: Option<usize>,
    root: Option<TreeNode>,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTreeRegressor {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTreeRegressor {
    pub fn new() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            root: None,
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    /// Fit on the rows listed in `rows` (repeats allowed, as in a bootstrap).
    /// `rng` drives per-split feature subsampling when `max_features` is set.
    pub fn fit_rows(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rows: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if rows.is_empty() {
            return Err(WorkbenchError::MissingTrainingData(
                "cannot grow a tree from zero rows".to_string(),
            ));
        }

        self.n_features = x.ncols();
        let mut importances = vec![0.0; self.n_features];
        let root = self.build(x, y, rows.to_vec(), 0, &mut importances, rng);
        self.root = Some(root);

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|imp| *imp /= total);
        }
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(())
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, rng: &mut ChaCha8Rng) -> Result<()> {
        let rows: Vec<usize> = (0..x.nrows()).collect();
        self.fit_rows(x, y, &rows, rng)
    }

    fn build(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rows: Vec<usize>,
        depth: usize,
        importances: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n = rows.len();
        let (sum, sq_sum) = rows
            .iter()
            .fold((0.0, 0.0), |(s, sq), &i| (s + y[i], sq + y[i] * y[i]));
        let mean = sum / n as f64;
        let sse = (sq_sum - sum * sum / n as f64).max(0.0);

        let stop = n < self.min_samples_split
            || n < 2 * self.min_samples_leaf
            || self.max_depth.is_some_and(|d| depth >= d)
            || sse <= 1e-12;
        if stop {
            return TreeNode::Leaf { value: mean, n_samples: n };
        }

        let features = self.candidate_features(rng);
        let best = features
            .par_iter()
            .filter_map(|&f| self.best_split_for_feature(x, y, &rows, f, sum, sse))
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((feature_idx, threshold, gain)) if gain > 0.0 => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                    rows.into_iter().partition(|&i| x[[i, feature_idx]] <= threshold);
                importances[feature_idx] += gain;

                let left = self.build(x, y, left_rows, depth + 1, importances, rng);
                let right = self.build(x, y, right_rows, depth + 1, importances, rng);
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left: Box::new(left),
                    right: Box::new(right),
                    n_samples: n,
                }
            }
            _ => TreeNode::Leaf { value: mean, n_samples: n },
        }
    }

    fn candidate_features(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        match self.max_features {
            Some(k) if k > 0 && k < self.n_features => {
                let mut picked = index::sample(rng, self.n_features, k).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..self.n_features).collect(),
        }
    }

    /// Sweep the rows sorted by feature `f`, tracking left-side sums. The
    /// impurity decrease of a split is `sse_parent - sse_left - sse_right`.
    fn best_split_for_feature(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        rows: &[usize],
        f: usize,
        total_sum: f64,
        parent_sse: f64,
    ) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, f64)> = rows.iter().map(|&i| (x[[i, f]], y[i])).collect();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted.len();
        let total_sq: f64 = sorted.iter().map(|(_, yi)| yi * yi).sum();
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        let mut best: Option<SplitCandidate> = None;

        for pos in 0..n - 1 {
            let (xv, yv) = sorted[pos];
            left_sum += yv;
            left_sq += yv * yv;

            let n_left = pos + 1;
            let n_right = n - n_left;
            if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                continue;
            }
            let next_x = sorted[pos + 1].0;
            if next_x <= xv {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse_left = left_sq - left_sum * left_sum / n_left as f64;
            let sse_right = right_sq - right_sum * right_sum / n_right as f64;
            let gain = parent_sse - sse_left - sse_right;

            if best.map_or(true, |(_, _, g)| gain > g) {
                best = Some((f, (xv + next_x) / 2.0, gain));
            }
        }
        best
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(WorkbenchError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.rows().into_iter().map(|row| root.predict_row(row)).collect())
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn test_step_function() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![5.0, 5.0, 5.0, 20.0, 20.0, 20.0];
        let mut tree = DecisionTreeRegressor::new();
        tree.fit(&x, &y, &mut rng()).unwrap();

        let preds = tree.predict(&array![[2.5], [11.5]]).unwrap();
        assert!((preds[0] - 5.0).abs() < 1e-12);
        assert!((preds[1] - 20.0).abs() < 1e-12);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x = Array2::from_shape_fn((64, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(64, |i| (i as f64).sin());
        let mut tree = DecisionTreeRegressor::new().with_max_depth(Some(3));
        tree.fit(&x, &y, &mut rng()).unwrap();
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn test_importances_follow_signal() {
        let x = Array2::from_shape_fn((50, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = Array1::from_shape_fn(50, |i| if i < 25 { 0.0 } else { 1.0 });
        let mut tree = DecisionTreeRegressor::new();
        tree.fit(&x, &y, &mut rng()).unwrap();
        let imp = tree.feature_importances().unwrap();
        assert!(imp[0] > imp[1], "importances = {:?}", imp);
        assert!((imp.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 0.0, 0.0, 100.0];
        let mut tree = DecisionTreeRegressor::new().with_min_samples_leaf(2);
        tree.fit(&x, &y, &mut rng()).unwrap();
        let preds = tree.predict(&array![[4.0]]).unwrap();
        assert!((preds[0] - 50.0).abs() < 1e-9);
    }
}
