//! Random forest regressor

use super::decision_tree::DecisionTreeRegressor;
use crate::error::{Result, WorkbenchError};
use crate::params::{ParamMap, ParamReader, ParamValue};
use ndarray::{Array1, Array2};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Features examined per split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Fraction(f64),
    Fixed(usize),
}

impl MaxFeatures {
    fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).floor() as usize,
            MaxFeatures::Fixed(k) => *k,
        };
        k.clamp(1, n_features.max(1))
    }

    fn from_param(value: Option<&ParamValue>) -> Result<Self> {
        let invalid = |v: &ParamValue| {
            WorkbenchError::invalid_param("max_features", v, "expected sqrt, log2, a fraction or a count")
        };
        match value {
            None | Some(ParamValue::Null) => Ok(MaxFeatures::All),
            Some(ParamValue::Str(s)) => match s.as_str() {
                "sqrt" | "auto" => Ok(MaxFeatures::Sqrt),
                "log2" => Ok(MaxFeatures::Log2),
                _ => Err(invalid(&ParamValue::Str(s.clone()))),
            },
            Some(ParamValue::Int(k)) if *k > 0 => Ok(MaxFeatures::Fixed(*k as usize)),
            Some(ParamValue::Float(f)) if *f > 0.0 && *f <= 1.0 => Ok(MaxFeatures::Fraction(*f)),
            Some(v) => Err(invalid(v)),
        }
    }
}

/// Configuration for [`RandomForestRegressor`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestConfig {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
    /// Worker bound; `None` uses the global rayon pool
    pub n_jobs: Option<usize>,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            random_state: None,
            n_jobs: None,
        }
    }
}

impl RandomForestConfig {
    pub fn from_params(params: &ParamMap) -> Result<Self> {
        let r = ParamReader::new(params);
        let d = Self::default();
        let n_estimators = r.usize_or("n_estimators", d.n_estimators)?;
        if n_estimators == 0 {
            return Err(WorkbenchError::invalid_param("n_estimators", 0, "must be at least 1"));
        }
        Ok(Self {
            n_estimators,
            max_depth: r.optional_usize("max_depth", d.max_depth)?,
            min_samples_split: r.usize_or("min_samples_split", d.min_samples_split)?,
            min_samples_leaf: r.usize_or("min_samples_leaf", d.min_samples_leaf)?,
            max_features: MaxFeatures::from_param(params.get("max_features"))?,
            bootstrap: r.bool_or("bootstrap", d.bootstrap)?,
            random_state: r.seed("random_state")?,
            n_jobs: r.n_jobs()?,
        })
    }
}

/// Bagged regression trees averaged at prediction time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    config: RandomForestConfig,
    trees: Vec<DecisionTreeRegressor>,
    feature_importances: Option<Array1<f64>>,
}

impl RandomForestRegressor {
    pub fn new(config: RandomForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            feature_importances: None,
        }
    }

    pub fn config(&self) -> &RandomForestConfig {
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
                "cannot fit a forest on zero rows".to_string(),
            ));
        }

        let cfg = &self.config;
        let max_features = Some(cfg.max_features.resolve(x.ncols()));
        let base_seed = match cfg.random_state {
            Some(seed) => seed,
            None => ChaCha8Rng::from_entropy().next_u64(),
        };

        let grow = |tree_idx: usize| -> Result<DecisionTreeRegressor> {
            let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
            let rows: Vec<usize> = if cfg.bootstrap {
                (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
            } else {
                (0..n_samples).collect()
            };
            let mut tree = DecisionTreeRegressor::new()
                .with_max_depth(cfg.max_depth)
                .with_min_samples_split(cfg.min_samples_split)
                .with_min_samples_leaf(cfg.min_samples_leaf)
                .with_max_features(max_features);
            tree.fit_rows(x, y, &rows, &mut rng)?;
            Ok(tree)
        };

        let trees: Vec<DecisionTreeRegressor> = match cfg.n_jobs {
            Some(1) => (0..cfg.n_estimators).map(grow).collect::<Result<_>>()?,
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()?
                .install(|| (0..cfg.n_estimators).into_par_iter().map(grow).collect::<Result<_>>())?,
            None => (0..cfg.n_estimators)
                .into_par_iter()
                .map(grow)
                .collect::<Result<_>>()?,
        };

        let mut importances = Array1::<f64>::zeros(x.ncols());
        for tree in &trees {
            if let Some(imp) = tree.feature_importances() {
                importances += imp;
            }
        }
        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }

        self.trees = trees;
        self.feature_importances = Some(importances);
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(WorkbenchError::ModelNotFitted);
        }
        let per_tree: Vec<Array1<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<_>>()?;

        let mut sum = Array1::<f64>::zeros(x.nrows());
        for preds in &per_tree {
            sum += preds;
        }
        Ok(sum / self.trees.len() as f64)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
