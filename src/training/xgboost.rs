//! XGBoost-style gradient boosting with second-order approximation
//!
//! - Leaf weights are regularized: w* = -G / (H + lambda), with L1 soft-thresholding
//! - Split gain: 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)] - γ
//! - `tree_method = exact` scans every distinct value; `hist` only scans
//!   pre-computed quantile bin edges, which bounds the per-node cost on large tables

use crate::error::{Result, WorkbenchError};
use crate::params::{ParamMap, ParamReader};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const HIST_MAX_BINS: usize = 256;

/// Split-finding strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeMethod {
    Exact,
    Hist,
}

impl TreeMethod {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "exact" | "auto" => Ok(TreeMethod::Exact),
            "hist" | "approx" => Ok(TreeMethod::Hist),
            other => Err(WorkbenchError::invalid_param(
                "tree_method",
                other,
                "expected exact or hist",
            )),
        }
    }
}

/// XGBoost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub tree_method: TreeMethod,
    pub n_jobs: Option<usize>,
    pub random_state: Option<u64>,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            tree_method: TreeMethod::Exact,
            n_jobs: None,
            random_state: Some(0),
        }
    }
}

impl XGBoostConfig {
    pub fn from_params(params: &ParamMap) -> Result<Self> {
        let r = ParamReader::new(params);
        let d = Self::default();
        let fraction = |key: &str, default: f64| -> Result<f64> {
            let v = r.f64_or(key, default)?;
            if v > 0.0 && v <= 1.0 {
                Ok(v)
            } else {
                Err(WorkbenchError::invalid_param(key, v, "must be in (0, 1]"))
            }
        };
        Ok(Self {
            n_estimators: r.usize_or("n_estimators", d.n_estimators)?,
            learning_rate: r.positive_f64_or("learning_rate", d.learning_rate)?,
            max_depth: r.usize_or("max_depth", d.max_depth)?,
            min_child_weight: r.f64_or("min_child_weight", d.min_child_weight)?,
            reg_lambda: r.f64_or("reg_lambda", d.reg_lambda)?,
            reg_alpha: r.f64_or("reg_alpha", d.reg_alpha)?,
            gamma: r.f64_or("gamma", d.gamma)?,
            subsample: fraction("subsample", d.subsample)?,
            colsample_bytree: fraction("colsample_bytree", d.colsample_bytree)?,
            tree_method: TreeMethod::parse(r.str_or("tree_method", "exact")?)?,
            n_jobs: r.n_jobs()?,
            random_state: r.seed("random_state")?.or(d.random_state),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum XGBNode {
    Leaf { weight: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<XGBNode>,
        right: Box<XGBNode>,
    },
}

impl XGBNode {
    fn predict(&self, sample: ndarray::ArrayView1<f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                XGBNode::Leaf { weight } => return *weight,
                XGBNode::Split { feature, threshold, left, right } => {
                    node = if sample[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Optimal leaf weight with L1 (alpha) and L2 (lambda) regularization
fn leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    let g = if g_sum > alpha {
        g_sum - alpha
    } else if g_sum < -alpha {
        g_sum + alpha
    } else {
        0.0
    };
    -g / (h_sum + lambda)
}

/// Quantile bin edges per feature, used by `TreeMethod::Hist`
fn build_bin_edges(x: &Array2<f64>, max_bins: usize) -> Vec<Vec<f64>> {
    (0..x.ncols())
        .into_par_iter()
        .map(|f| {
            let mut values: Vec<f64> = x.column(f).to_vec();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            if values.len() <= max_bins {
                return values
                    .windows(2)
                    .map(|w| (w[0] + w[1]) / 2.0)
                    .collect();
            }
            let mut edges: Vec<f64> = (1..max_bins)
                .map(|b| values[b * values.len() / max_bins])
                .collect();
            edges.dedup();
            edges
        })
        .collect()
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    grad: &'a Array1<f64>,
    hess: &'a Array1<f64>,
    features: &'a [usize],
    bin_edges: Option<&'a [Vec<f64>]>,
    config: &'a XGBoostConfig,
}

impl<'a> TreeBuilder<'a> {
    fn build(&self, rows: Vec<usize>, depth: usize, importances: &mut [f64]) -> XGBNode {
        let g_sum: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h_sum: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let weight = leaf_weight(g_sum, h_sum, self.config.reg_lambda, self.config.reg_alpha);

        if depth >= self.config.max_depth || rows.len() < 2 || h_sum < self.config.min_child_weight {
            return XGBNode::Leaf { weight };
        }

        let best = self
            .features
            .par_iter()
            .filter_map(|&f| match self.bin_edges {
                Some(edges) => self.best_hist_split(&rows, f, &edges[f], g_sum, h_sum),
                None => self.best_exact_split(&rows, f, g_sum, h_sum),
            })
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((feature, threshold, gain)) if gain > self.config.gamma => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                    rows.into_iter().partition(|&i| self.x[[i, feature]] <= threshold);
                if left_rows.is_empty() || right_rows.is_empty() {
                    return XGBNode::Leaf { weight };
                }
                importances[feature] += gain;
                let left = self.build(left_rows, depth + 1, importances);
                let right = self.build(right_rows, depth + 1, importances);
                XGBNode::Split {
                    feature,
                    threshold,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            _ => XGBNode::Leaf { weight },
        }
    }

    fn gain(&self, gl: f64, hl: f64, g_total: f64, h_total: f64) -> Option<f64> {
        let gr = g_total - gl;
        let hr = h_total - hl;
        if hl < self.config.min_child_weight || hr < self.config.min_child_weight {
            return None;
        }
        let lambda = self.config.reg_lambda;
        Some(0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - g_total * g_total / (h_total + lambda)))
    }

    fn best_exact_split(&self, rows: &[usize], f: usize, g_total: f64, h_total: f64) -> Option<(usize, f64, f64)> {
        let mut sorted = rows.to_vec();
        sorted.sort_by(|&a, &b| {
            self.x[[a, f]]
                .partial_cmp(&self.x[[b, f]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (mut gl, mut hl) = (0.0, 0.0);
        let mut best: Option<(usize, f64, f64)> = None;
        for pos in 0..sorted.len() - 1 {
            let idx = sorted[pos];
            gl += self.grad[idx];
            hl += self.hess[idx];
            let (cur, next) = (self.x[[idx, f]], self.x[[sorted[pos + 1], f]]);
            if next <= cur {
                continue;
            }
            if let Some(gain) = self.gain(gl, hl, g_total, h_total) {
                if best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((f, (cur + next) / 2.0, gain));
                }
            }
        }
        best
    }

    fn best_hist_split(
        &self,
        rows: &[usize],
        f: usize,
        edges: &[f64],
        g_total: f64,
        h_total: f64,
    ) -> Option<(usize, f64, f64)> {
        if edges.is_empty() {
            return None;
        }
        // bin b holds values in (edges[b-1], edges[b]]
        let mut g_bins = vec![0.0; edges.len() + 1];
        let mut h_bins = vec![0.0; edges.len() + 1];
        for &i in rows {
            let v = self.x[[i, f]];
            let bin = edges.partition_point(|&e| e < v);
            g_bins[bin] += self.grad[i];
            h_bins[bin] += self.hess[i];
        }

        let (mut gl, mut hl) = (0.0, 0.0);
        let mut best: Option<(usize, f64, f64)> = None;
        for (b, &edge) in edges.iter().enumerate() {
            gl += g_bins[b];
            hl += h_bins[b];
            if let Some(gain) = self.gain(gl, hl, g_total, h_total) {
                if best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((f, edge, gain));
                }
            }
        }
        best
    }
}

/// XGBoost Regressor (squared error loss)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostRegressor {
    config: XGBoostConfig,
    trees: Vec<XGBNode>,
    base_score: f64,
    feature_importances: Option<Array1<f64>>,
    n_features: usize,
}

impl XGBoostRegressor {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            feature_importances: None,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        match self.config.n_jobs {
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()?
                .install(|| self.fit_inner(x, y)),
            None => self.fit_inner(x, y),
        }
    }

    fn fit_inner(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(WorkbenchError::MissingTrainingData(
                "cannot boost on zero rows".to_string(),
            ));
        }

        self.n_features = n_features;
        self.base_score = y.sum() / n_samples as f64;
        self.trees.clear();
        let mut preds = Array1::from_elem(n_samples, self.base_score);
        let mut importances = vec![0.0; n_features];

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let bin_edges = match self.config.tree_method {
            TreeMethod::Hist => Some(build_bin_edges(x, HIST_MAX_BINS)),
            TreeMethod::Exact => None,
        };
        // squared error: g = pred - y, h = 1
        let hess = Array1::<f64>::ones(n_samples);
        let n_rows = ((n_samples as f64) * self.config.subsample).ceil() as usize;
        let n_cols = (((n_features as f64) * self.config.colsample_bytree).ceil() as usize).max(1);

        for _ in 0..self.config.n_estimators {
            let grad = &preds - y;

            let mut rows: Vec<usize> = (0..n_samples).collect();
            if n_rows < n_samples {
                rows.shuffle(&mut rng);
                rows.truncate(n_rows);
            }
            let mut features: Vec<usize> = (0..n_features).collect();
            if n_cols < n_features {
                features.shuffle(&mut rng);
                features.truncate(n_cols);
                features.sort_unstable();
            }

            let builder = TreeBuilder {
                x,
                grad: &grad,
                hess: &hess,
                features: &features,
                bin_edges: bin_edges.as_deref(),
                config: &self.config,
            };
            let tree = builder.build(rows, 0, &mut importances);

            for (i, row) in x.rows().into_iter().enumerate() {
                preds[i] += self.config.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.feature_importances.is_none() {
            return Err(WorkbenchError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let lr = self.config.learning_rate;
        Ok(x.rows()
            .into_iter()
            .map(|row| self.base_score + lr * self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
            .collect())
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}
