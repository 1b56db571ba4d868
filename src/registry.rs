//! Algorithm registry
//!
//! Three related tables keyed by [`ModelType`]:
//! - the single-model table (display name, accepted parameters, default
//!   search space),
//! - the AutoML tables (fast, thorough and two size-optimized variants),
//! - the stacking base/meta catalogs of ready-configured learners.

use crate::config::SizeThresholds;
use crate::error::{Result, WorkbenchError};
use crate::params::{grid, ParamGrid, ParamMap, ParamValue};
use crate::training::Regressor;
use crate::tuning;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Canonical model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelType {
    LinearRegression,
    RandomForest,
    GradientBoosting,
    XGBoost,
    SVR,
    MLP,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::LinearRegression,
        ModelType::RandomForest,
        ModelType::GradientBoosting,
        ModelType::XGBoost,
        ModelType::SVR,
        ModelType::MLP,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ModelType::LinearRegression => "LinearRegression",
            ModelType::RandomForest => "RandomForest",
            ModelType::GradientBoosting => "GradientBoosting",
            ModelType::XGBoost => "XGBoost",
            ModelType::SVR => "SVR",
            ModelType::MLP => "MLP",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::LinearRegression => "Linear Regression (LR)",
            ModelType::RandomForest => "Random Forest (RF)",
            ModelType::GradientBoosting => "Gradient Boosting (GBR)",
            ModelType::XGBoost => "XGBoost (XGBR)",
            ModelType::SVR => "Support Vector Regression (SVR)",
            ModelType::MLP => "Neural Network (ANN)",
        }
    }

    /// Constructor parameters the estimator understands
    pub fn accepted_params(&self) -> &'static [&'static str] {
        match self {
            ModelType::LinearRegression => &["copy_X", "fit_intercept", "n_jobs", "positive"],
            ModelType::RandomForest => &[
                "bootstrap",
                "max_depth",
                "max_features",
                "min_samples_leaf",
                "min_samples_split",
                "n_estimators",
                "n_jobs",
                "random_state",
            ],
            ModelType::GradientBoosting => &[
                "learning_rate",
                "max_depth",
                "min_samples_leaf",
                "min_samples_split",
                "n_estimators",
                "random_state",
                "subsample",
            ],
            ModelType::XGBoost => &[
                "colsample_bytree",
                "gamma",
                "learning_rate",
                "max_depth",
                "min_child_weight",
                "n_estimators",
                "n_jobs",
                "random_state",
                "reg_alpha",
                "reg_lambda",
                "subsample",
                "tree_method",
            ],
            ModelType::SVR => &[
                "C",
                "cache_size",
                "coef0",
                "degree",
                "epsilon",
                "gamma",
                "kernel",
                "max_iter",
                "tol",
            ],
            ModelType::MLP => &[
                "activation",
                "alpha",
                "batch_size",
                "early_stopping",
                "hidden_layer_sizes",
                "learning_rate",
                "learning_rate_init",
                "max_iter",
                "momentum",
                "n_iter_no_change",
                "random_state",
                "solver",
                "tol",
                "validation_fraction",
            ],
        }
    }

    pub fn accepts(&self, key: &str) -> bool {
        self.accepted_params().contains(&key)
    }

    /// Default search space of the single-model table
    pub fn default_grid(&self) -> ParamGrid {
        match self {
            ModelType::LinearRegression => grid(&[
                ("fit_intercept", vec![true.into(), false.into()]),
                ("copy_X", vec![true.into(), false.into()]),
                ("n_jobs", vec![ParamValue::Null, (-1).into()]),
                ("positive", vec![false.into(), true.into()]),
            ]),
            ModelType::RandomForest => grid(&[
                ("n_estimators", vec![50.into(), 100.into(), 200.into()]),
                ("max_depth", vec![ParamValue::Null, 10.into(), 20.into(), 30.into()]),
                ("min_samples_split", vec![2.into(), 5.into(), 10.into()]),
                ("min_samples_leaf", vec![1.into(), 2.into(), 4.into()]),
            ]),
            ModelType::GradientBoosting | ModelType::XGBoost => grid(&[
                ("n_estimators", vec![50.into(), 100.into(), 200.into()]),
                ("learning_rate", vec![0.01.into(), 0.1.into(), 0.2.into()]),
                ("max_depth", vec![3.into(), 5.into(), 7.into()]),
                ("subsample", vec![0.8.into(), 0.9.into(), 1.0.into()]),
            ]),
            ModelType::SVR => grid(&[
                ("C", vec![0.1.into(), 1.into(), 10.into(), 100.into()]),
                (
                    "gamma",
                    vec!["scale".into(), "auto".into(), 0.001.into(), 0.01.into(), 0.1.into()],
                ),
                ("kernel", vec!["rbf".into(), "linear".into(), "poly".into()]),
            ]),
            ModelType::MLP => grid(&[
                (
                    "hidden_layer_sizes",
                    vec![
                        ParamValue::layers(&[50]),
                        ParamValue::layers(&[100]),
                        ParamValue::layers(&[50, 50]),
                        ParamValue::layers(&[100, 50]),
                    ],
                ),
                ("activation", vec!["relu".into(), "tanh".into(), "logistic".into()]),
                ("alpha", vec![0.0001.into(), 0.001.into(), 0.01.into()]),
                ("learning_rate", vec!["constant".into(), "adaptive".into()]),
            ]),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelType {
    type Err = WorkbenchError;

    fn from_str(s: &str) -> Result<Self> {
        ModelType::ALL
            .iter()
            .copied()
            .find(|m| m.key() == s)
            .ok_or_else(|| WorkbenchError::UnsupportedModelType(s.to_string()))
    }
}

/// Registry listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub key: String,
    pub name: String,
    pub params: Vec<String>,
}

/// `{key, name, params}` for every family, params being the searchable keys
pub fn available_models() -> Vec<ModelInfo> {
    ModelType::ALL
        .iter()
        .map(|m| ModelInfo {
            key: m.key().to_string(),
            name: m.display_name().to_string(),
            params: m.default_grid().into_keys().collect(),
        })
        .collect()
}

/// AutoML search breadth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    Fast,
    Thorough,
}

impl FromStr for TrainingMode {
    type Err = WorkbenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(TrainingMode::Fast),
            "thorough" => Ok(TrainingMode::Thorough),
            other => Err(WorkbenchError::invalid_param(
                "training_mode",
                other,
                "expected fast or thorough",
            )),
        }
    }
}

/// AutoML search space for `model` given the mode and the table size.
///
/// Above `optimized_table_rows` the size-optimized table replaces both modes,
/// and above `very_large_rows` a leaner one again.
pub fn automl_grid(
    model: ModelType,
    mode: TrainingMode,
    rows: usize,
    thresholds: &SizeThresholds,
) -> ParamGrid {
    if rows > thresholds.very_large_rows {
        very_large_automl_grid(model)
    } else if rows > thresholds.optimized_table_rows {
        large_automl_grid(model)
    } else {
        match mode {
            TrainingMode::Fast => fast_automl_grid(model),
            TrainingMode::Thorough => thorough_automl_grid(model),
        }
    }
}

fn fast_automl_grid(model: ModelType) -> ParamGrid {
    match model {
        ModelType::LinearRegression => grid(&[("fit_intercept", vec![true.into()])]),
        ModelType::RandomForest => grid(&[
            ("n_estimators", vec![50.into()]),
            ("max_depth", vec![10.into()]),
        ]),
        ModelType::GradientBoosting => grid(&[
            ("n_estimators", vec![50.into()]),
            ("learning_rate", vec![0.1.into()]),
        ]),
        ModelType::XGBoost => grid(&[
            ("n_estimators", vec![50.into()]),
            ("learning_rate", vec![0.1.into()]),
            ("max_depth", vec![3.into()]),
            ("n_jobs", vec![1.into()]),
        ]),
        ModelType::SVR => grid(&[
            ("C", vec![1.into()]),
            ("gamma", vec!["scale".into()]),
            ("kernel", vec!["rbf".into()]),
        ]),
        ModelType::MLP => grid(&[
            ("hidden_layer_sizes", vec![ParamValue::layers(&[50])]),
            ("activation", vec!["relu".into()]),
            ("alpha", vec![0.001.into()]),
            ("max_iter", vec![300.into()]),
        ]),
    }
}

fn thorough_automl_grid(model: ModelType) -> ParamGrid {
    match model {
        ModelType::LinearRegression => grid(&[("fit_intercept", vec![true.into(), false.into()])]),
        ModelType::RandomForest => grid(&[
            ("n_estimators", vec![50.into(), 100.into()]),
            ("max_depth", vec![ParamValue::Null, 10.into()]),
            ("min_samples_split", vec![2.into(), 5.into()]),
        ]),
        ModelType::GradientBoosting => grid(&[
            ("n_estimators", vec![50.into(), 100.into()]),
            ("learning_rate", vec![0.1.into(), 0.2.into()]),
            ("max_depth", vec![3.into(), 5.into()]),
        ]),
        ModelType::XGBoost => grid(&[
            ("n_estimators", vec![50.into(), 100.into()]),
            ("learning_rate", vec![0.1.into(), 0.2.into()]),
            ("max_depth", vec![3.into(), 5.into()]),
            ("n_jobs", vec![1.into()]),
        ]),
        ModelType::SVR => grid(&[
            ("C", vec![1.into(), 10.into()]),
            ("gamma", vec!["scale".into()]),
            ("kernel", vec!["rbf".into()]),
        ]),
        ModelType::MLP => grid(&[
            (
                "hidden_layer_sizes",
                vec![ParamValue::layers(&[50]), ParamValue::layers(&[100])],
            ),
            ("activation", vec!["relu".into()]),
            ("alpha", vec![0.001.into()]),
            ("max_iter", vec![300.into()]),
        ]),
    }
}

fn large_automl_grid(model: ModelType) -> ParamGrid {
    match model {
        ModelType::LinearRegression => grid(&[("fit_intercept", vec![true.into()])]),
        ModelType::RandomForest => grid(&[
            ("n_estimators", vec![40.into()]),
            ("max_depth", vec![10.into()]),
            ("n_jobs", vec![(-1).into()]),
        ]),
        ModelType::GradientBoosting => grid(&[
            ("n_estimators", vec![40.into()]),
            ("learning_rate", vec![0.1.into()]),
            ("max_depth", vec![5.into()]),
        ]),
        ModelType::XGBoost => grid(&[
            ("n_estimators", vec![40.into()]),
            ("learning_rate", vec![0.1.into()]),
            ("max_depth", vec![5.into()]),
            ("n_jobs", vec![(-1).into()]),
            ("tree_method", vec!["hist".into()]),
        ]),
        ModelType::SVR => grid(&[
            ("C", vec![1.into()]),
            ("gamma", vec!["scale".into()]),
            ("kernel", vec!["rbf".into()]),
        ]),
        ModelType::MLP => grid(&[
            ("hidden_layer_sizes", vec![ParamValue::layers(&[50])]),
            ("activation", vec!["relu".into()]),
            ("alpha", vec![0.001.into()]),
            ("max_iter", vec![200.into()]),
        ]),
    }
}

fn very_large_automl_grid(model: ModelType) -> ParamGrid {
    match model {
        ModelType::LinearRegression => grid(&[("fit_intercept", vec![true.into()])]),
        ModelType::RandomForest => grid(&[
            ("n_estimators", vec![30.into()]),
            ("max_depth", vec![8.into()]),
            ("n_jobs", vec![(-1).into()]),
        ]),
        ModelType::GradientBoosting => grid(&[
            ("n_estimators", vec![30.into()]),
            ("learning_rate", vec![0.15.into()]),
            ("max_depth", vec![4.into()]),
        ]),
        ModelType::XGBoost => grid(&[
            ("n_estimators", vec![30.into()]),
            ("learning_rate", vec![0.15.into()]),
            ("max_depth", vec![4.into()]),
            ("n_jobs", vec![(-1).into()]),
            ("tree_method", vec!["hist".into()]),
        ]),
        ModelType::SVR => grid(&[
            ("C", vec![1.into()]),
            ("gamma", vec!["scale".into()]),
            ("kernel", vec!["rbf".into()]),
            ("cache_size", vec![1000.into()]),
        ]),
        ModelType::MLP => grid(&[
            ("hidden_layer_sizes", vec![ParamValue::layers(&[30])]),
            ("activation", vec!["relu".into()]),
            ("alpha", vec![0.001.into()]),
            ("max_iter", vec![150.into()]),
            ("early_stopping", vec![true.into()]),
            ("validation_fraction", vec![0.1.into()]),
        ]),
    }
}

/// Keys of the stacking base-learner catalog
pub const STACKING_BASE_KEYS: [&str; 6] = ["gbr", "lr", "mlp", "rf", "svr", "xgb"];

/// Base learners used when a caller names none
pub const DEFAULT_STACKING_BASE: [&str; 3] = ["rf", "gbr", "lr"];

fn params_of(entries: &[(&str, ParamValue)]) -> ParamMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Catalog entry for a stacking base learner key, or `None` if unknown
pub fn stacking_base_spec(key: &str) -> Option<(ModelType, ParamMap)> {
    let spec = match key {
        "rf" => (
            ModelType::RandomForest,
            params_of(&[("n_estimators", 100.into()), ("random_state", 42.into())]),
        ),
        "gbr" => (
            ModelType::GradientBoosting,
            params_of(&[("n_estimators", 100.into()), ("random_state", 42.into())]),
        ),
        "lr" => (ModelType::LinearRegression, ParamMap::new()),
        "xgb" => (
            ModelType::XGBoost,
            params_of(&[("n_estimators", 100.into()), ("random_state", 42.into())]),
        ),
        "svr" => (ModelType::SVR, ParamMap::new()),
        "mlp" => (
            ModelType::MLP,
            params_of(&[
                ("hidden_layer_sizes", ParamValue::layers(&[100])),
                ("max_iter", 300.into()),
                ("random_state", 42.into()),
            ]),
        ),
        _ => return None,
    };
    Some(spec)
}

/// Catalog entry for a stacking meta learner name
pub fn stacking_meta_spec(name: &str) -> Result<(ModelType, ParamMap)> {
    match name {
        "LinearRegression" => Ok((ModelType::LinearRegression, ParamMap::new())),
        "RandomForest" => Ok((
            ModelType::RandomForest,
            params_of(&[("n_estimators", 50.into()), ("random_state", 42.into())]),
        )),
        "GradientBoosting" => Ok((
            ModelType::GradientBoosting,
            params_of(&[("n_estimators", 50.into()), ("random_state", 42.into())]),
        )),
        other => Err(WorkbenchError::UnsupportedModelType(format!(
            "{} (meta learners: LinearRegression, RandomForest, GradientBoosting)",
            other
        ))),
    }
}

/// Resolve base learner keys into unfitted estimators, tightened for the
/// table size. Unknown keys are dropped with a warning.
pub fn build_stacking_base(
    keys: &[String],
    rows: usize,
    thresholds: &SizeThresholds,
) -> Result<Vec<(String, Regressor)>> {
    let mut learners = Vec::new();
    for key in keys {
        if learners.iter().any(|(name, _): &(String, Regressor)| name == key) {
            continue;
        }
        match stacking_base_spec(key) {
            Some((model, params)) => {
                let params = tuning::optimize_for_size(model, &params, rows, thresholds);
                learners.push((key.clone(), Regressor::from_params(model, &params)?));
            }
            None => warn!(
                base_model = %key,
                known = ?STACKING_BASE_KEYS,
                "Unknown stacking base learner ignored"
            ),
        }
    }
    if learners.is_empty() {
        return Err(WorkbenchError::UnsupportedModelType(format!(
            "no known base learners in {:?}",
            keys
        )));
    }
    Ok(learners)
}

pub fn build_stacking_meta(name: &str, rows: usize, thresholds: &SizeThresholds) -> Result<Regressor> {
    let (model, params) = stacking_meta_spec(name)?;
    Regressor::from_params(model, &tuning::optimize_for_size(model, &params, rows, thresholds))
}
