//! Single-model trainer
//!
//! Split, validate and tighten parameters, fit one estimator per target
//! (directly or through grid search), score train/validation partitions and
//! cross-validate. Any per-target fit failure aborts the call.

use crate::config::WorkbenchConfig;
use crate::data::{sample_indices, seeded_rng, train_test_indices, Dataset};
use crate::error::{Result, WorkbenchError};
use crate::metrics::RegressionMetrics;
use crate::params::ParamMap;
use crate::record::{ModelHandle, RecordDetails, TrainedModelRecord};
use crate::registry::ModelType;
use crate::training::{cross_val_score, search, KFold, Regressor, SearchConfig};
use crate::tuning;
use chrono::Utc;
use ndarray::{Array1, Axis};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Parameters of a single-model training call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    pub model_type: String,
    pub target_columns: Vec<String>,
    /// Defaults to every non-target column
    pub feature_columns: Option<Vec<String>>,
    pub test_size: Option<f64>,
    pub random_state: Option<u64>,
    pub use_grid_search: bool,
    pub model_params: ParamMap,
}

/// Metrics keyed by target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub train: BTreeMap<String, RegressionMetrics>,
    pub validation: BTreeMap<String, RegressionMetrics>,
    /// Mean cross-validated MSE (or the validation MSE when CV failed)
    pub cross_validation: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub record: TrainedModelRecord,
    pub metrics: TrainingMetrics,
    /// Winning grid-search parameters per target
    pub best_params: BTreeMap<String, ParamMap>,
}

/// Validation fraction after the large-table clamp
pub fn resolve_test_size(requested: Option<f64>, rows: usize, config: &WorkbenchConfig) -> f64 {
    let test_size = requested.unwrap_or(config.default_test_size);
    if rows > config.thresholds.validation_shrink_rows {
        test_size.min(config.thresholds.large_test_size_cap)
    } else {
        test_size
    }
}

pub fn train_model(df: &DataFrame, params: &TrainParams, config: &WorkbenchConfig) -> Result<TrainingOutcome> {
    let model: ModelType = params.model_type.parse()?;
    if params.target_columns.is_empty() {
        return Err(WorkbenchError::MissingTargetColumns);
    }
    let dataset = Dataset::from_frame(df, &params.target_columns, params.feature_columns.as_deref())?;
    let thresholds = &config.thresholds;
    let rows = dataset.n_rows();
    let started = Instant::now();

    let test_size = resolve_test_size(params.test_size, rows, config);
    let seed = params.random_state.unwrap_or(config.default_random_state);
    let (train_idx, val_idx) = train_test_indices(rows, test_size, seed)?;
    let train = dataset.select_rows(&train_idx);
    let val = dataset.select_rows(&val_idx);

    let mut validated = tuning::validate_params(model, &params.model_params);
    if thresholds.is_large(rows) {
        validated = tuning::optimize_for_size(model, &validated, rows, thresholds);
    }
    let cv_folds = thresholds.cv_folds_for(rows, config.default_cv_folds);

    info!(
        model = %model,
        rows,
        targets = dataset.target_columns.len(),
        test_size,
        grid_search = params.use_grid_search,
        "Training single model"
    );

    let mut models = BTreeMap::new();
    let mut metrics = TrainingMetrics::default();
    let mut best_params = BTreeMap::new();

    for (idx, target) in dataset.target_columns.iter().enumerate() {
        let y_train = train.target_owned(idx);
        let y_val = val.target_owned(idx);

        let fitted = if params.use_grid_search {
            let grid = tuning::merge_grid(model, &validated);
            let search_config = SearchConfig {
                cv_folds,
                random_state: seed,
                ..Default::default()
            };
            let outcome = search(model, &grid, &train.x, &y_train, &search_config)
                .map_err(|e| target_failure(target, e))?;
            best_params.insert(target.clone(), outcome.best_params);
            outcome.best_estimator
        } else {
            let mut estimator = Regressor::from_params(model, &validated)?;
            estimator
                .fit(&train.x, &y_train)
                .map_err(|e| target_failure(target, e))?;
            estimator
        };

        let train_pred = fitted.predict(&train.x)?;
        let val_pred = fitted.predict(&val.x)?;
        metrics
            .train
            .insert(target.clone(), RegressionMetrics::compute(&y_train, &train_pred)?);
        metrics
            .validation
            .insert(target.clone(), RegressionMetrics::compute(&y_val, &val_pred)?);
        models.insert(target.clone(), fitted);
    }

    // Cross-validation runs on the whole table, sampled above cv_subsample_rows.
    let cv_rows: Option<Vec<usize>> = if rows > thresholds.cv_subsample_rows {
        let mut rng = seeded_rng(Some(seed));
        Some(sample_indices(rows, thresholds.cv_sample_size(rows), &mut rng))
    } else {
        None
    };
    let cv_x = match &cv_rows {
        Some(sample) => dataset.x.select(Axis(0), sample),
        None => dataset.x.clone(),
    };
    let kfold = KFold::new(cv_folds).shuffled(seed);

    for (idx, target) in dataset.target_columns.iter().enumerate() {
        let cv_y: Array1<f64> = match &cv_rows {
            Some(sample) => dataset.target(idx).select(Axis(0), sample),
            None => dataset.target_owned(idx),
        };
        let score = match models.get(target) {
            Some(estimator) => match cross_val_score(estimator, &cv_x, &cv_y, &kfold) {
                Ok(cv) => cv.mean_mse(),
                Err(e) => {
                    let fallback = metrics.validation.get(target).map(|m| m.mse).unwrap_or(0.0);
                    warn!(target = %target, error = %e, fallback, "Cross-validation failed, using validation MSE");
                    fallback
                }
            },
            None => continue,
        };
        metrics.cross_validation.insert(target.clone(), score);
    }

    let recorded_params = match best_params.get(&dataset.target_columns[0]) {
        Some(best) if dataset.target_columns.len() == 1 => best.clone(),
        _ => validated,
    };

    let record = TrainedModelRecord {
        model_id: Uuid::new_v4().to_string(),
        model: ModelHandle::from_targets(models, &dataset.target_columns)?,
        model_type: model.key().to_string(),
        model_name: model.display_name().to_string(),
        feature_columns: dataset.feature_columns.clone(),
        target_columns: dataset.target_columns.clone(),
        params: recorded_params,
        details: RecordDetails::SingleModel {
            use_grid_search: params.use_grid_search,
            test_size,
            cv_folds,
            best_params: best_params.clone(),
        },
        training_time: Utc::now(),
        data_shape: (df.height(), df.width()),
    };

    info!(
        model_id = %record.model_id,
        model = %model,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Single model trained"
    );

    Ok(TrainingOutcome {
        record,
        metrics,
        best_params,
    })
}

fn target_failure(target: &str, err: WorkbenchError) -> WorkbenchError {
    WorkbenchError::TrainingError(format!("target '{}': {}", target, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;
    use polars::prelude::*;

    #[test]
    fn test_test_size_clamp() {
        let config = WorkbenchConfig::default();
        assert_eq!(resolve_test_size(None, 10_000, &config), 0.2);
        assert_eq!(resolve_test_size(None, 10_001, &config), 0.15);
        assert_eq!(resolve_test_size(Some(0.1), 10_001, &config), 0.1);
    }

    #[test]
    fn test_rejects_unknown_model_before_targets() {
        let df = df!("x" => &[1.0, 2.0], "y" => &[1.0, 2.0]).unwrap();
        let params = TrainParams {
            model_type: "Lasso".into(),
            ..Default::default()
        };
        let err = train_model(&df, &params, &WorkbenchConfig::default()).unwrap_err();
        assert!(matches!(err, WorkbenchError::UnsupportedModelType(_)));

        let params = TrainParams {
            model_type: "LinearRegression".into(),
            ..Default::default()
        };
        let err = train_model(&df, &params, &WorkbenchConfig::default()).unwrap_err();
        assert!(matches!(err, WorkbenchError::MissingTargetColumns));
    }

    #[test]
    fn test_grid_search_records_best_params() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 7.0).collect();
        let df = df!("x" => &x, "y" => &y).unwrap();

        let mut model_params = ParamMap::new();
        model_params.insert("positive".into(), false.into());
        let params = TrainParams {
            model_type: "LinearRegression".into(),
            target_columns: vec!["y".into()],
            use_grid_search: true,
            model_params,
            ..Default::default()
        };
        let outcome = train_model(&df, &params, &WorkbenchConfig::default()).unwrap();
        let best = &outcome.best_params["y"];
        assert_eq!(best["fit_intercept"], ParamValue::Bool(true));
        assert_eq!(best["positive"], ParamValue::Bool(false));
        assert_eq!(outcome.record.params, *best);
        assert!(outcome.metrics.validation["y"].r2 > 0.999);
    }
}
