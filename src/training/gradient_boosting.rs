//! Gradient boosting regressor (least-squares loss)
//!
//! Each round fits a shallow regression tree to the current residuals on an
//! optional row subsample and adds its shrunken prediction to the ensemble.

use super::decision_tree::DecisionTreeRegressor;
use crate::error::{Result, WorkbenchError};
use crate::params::{ParamMap, ParamReader};
use ndarray::{Array1, Array2};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Gradient Boosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Shrinkage applied to every tree
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Row fraction drawn (without replacement) per round
    pub subsample: f64,
    pub random_state: Option<u64>,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            random_state: None,
        }
    }
}

impl GradientBoostingConfig {
    pub fn from_params(params: &ParamMap) -> Result<Self> {
        let r = ParamReader::new(params);
        let d = Self::default();
        let subsample = r.f64_or("subsample", d.subsample)?;
        if !(subsample > 0.0 && subsample <= 1.0) {
            return Err(WorkbenchError::invalid_param("subsample", subsample, "must be in (0, 1]"));
        }
        Ok(Self {
            n_estimators: r.usize_or("n_estimators", d.n_estimators)?,
            learning_rate: r.positive_f64_or("learning_rate", d.learning_rate)?,
            max_depth: r.usize_or("max_depth", d.max_depth)?,
            min_samples_split: r.usize_or("min_samples_split", d.min_samples_split)?,
            min_samples_leaf: r.usize_or("min_samples_leaf", d.min_samples_leaf)?,
            subsample,
            random_state: r.seed("random_state")?,
        })
    }
}

/// Gradient Boosting Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    config: GradientBoostingConfig,
    trees: Vec<DecisionTreeRegressor>,
    initial_prediction: f64,
    feature_importances: Option<Array1<f64>>,
    fitted: bool,
}

impl GradientBoostingRegressor {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            initial_prediction: 0.0,
            feature_importances: None,
            fitted: false,
        }
    }

    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
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

        let mut sampler = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        // Trees examine every feature, so their rng only has to exist.
        let mut tree_rng = ChaCha8Rng::seed_from_u64(self.config.random_state.unwrap_or(0));

        self.initial_prediction = y.sum() / n_samples as f64;
        let mut predictions = Array1::from_elem(n_samples, self.initial_prediction);
        let mut importances = Array1::<f64>::zeros(x.ncols());
        let sample_size = ((n_samples as f64) * self.config.subsample).ceil() as usize;
        self.trees.clear();

        for _ in 0..self.config.n_estimators {
            let residuals = y - &predictions;

            let rows: Vec<usize> = if sample_size < n_samples {
                let mut rows = index::sample(&mut sampler, n_samples, sample_size).into_vec();
                rows.sort_unstable();
                rows
            } else {
                (0..n_samples).collect()
            };

            let mut tree = DecisionTreeRegressor::new()
                .with_max_depth(Some(self.config.max_depth))
                .with_min_samples_split(self.config.min_samples_split)
                .with_min_samples_leaf(self.config.min_samples_leaf);
            tree.fit_rows(x, &residuals, &rows, &mut tree_rng)?;

            let update = tree.predict(x)?;
            predictions.scaled_add(self.config.learning_rate, &update);
            if let Some(imp) = tree.feature_importances() {
                importances += imp;
            }
            self.trees.push(tree);
        }

        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }
        self.feature_importances = Some(importances);
        self.fitted = true;
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.fitted {
            return Err(WorkbenchError::ModelNotFitted);
        }
        let mut predictions = Array1::from_elem(x.nrows(), self.initial_prediction);
        for tree in &self.trees {
            predictions.scaled_add(self.config.learning_rate, &tree.predict(x)?);
        }
        Ok(predictions)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}
