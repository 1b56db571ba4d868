//! Stacking orchestrator
//!
//! Trains one two-layer ensemble per target. A failing target is recorded and
//! skipped; the call fails only when no target produced an ensemble.

use crate::config::WorkbenchConfig;
use crate::data::{sample_indices, seeded_rng, Dataset};
use crate::ensemble::{StackingConfig, StackingRegressor};
use crate::error::{Result, UnitOutcome, WorkbenchError};
use crate::metrics::{mean_std, RegressionMetrics};
use crate::params::{ParamMap, ParamValue};
use crate::record::{ModelHandle, RecordDetails, RecordSummary, TrainedModelRecord};
use crate::registry::{build_stacking_base, build_stacking_meta, DEFAULT_STACKING_BASE};
use crate::training::cross_validation::fit_predict_fold;
use crate::training::{cross_val_score, KFold, Regressor};
use chrono::Utc;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Fold seed of the base-learner diagnostics
const DIAGNOSTIC_SEED: u64 = 42;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingParams {
    pub target_columns: Vec<String>,
    pub feature_columns: Option<Vec<String>>,
    /// Base learner catalog keys (`rf`, `gbr`, `lr`, `xgb`, `svr`, `mlp`)
    pub base_models: Vec<String>,
    /// `LinearRegression`, `RandomForest` or `GradientBoosting`
    pub meta_model: String,
    pub cv_folds: usize,
    pub random_state: Option<u64>,
}

impl Default for StackingParams {
    fn default() -> Self {
        Self {
            target_columns: Vec::new(),
            feature_columns: None,
            base_models: DEFAULT_STACKING_BASE.iter().map(|k| k.to_string()).collect(),
            meta_model: "LinearRegression".to_string(),
            cv_folds: 5,
            random_state: None,
        }
    }
}

/// In-sample metrics plus the cross-validated MSE of one target's ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackingMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// Mean fold MSE; 0.0 when cross-validation failed
    pub cv_score: f64,
    pub cv_std: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingReport {
    pub model_id: String,
    pub model_info: RecordSummary,
    pub metrics: BTreeMap<String, UnitOutcome<StackingMetrics>>,
    pub base_models: Vec<String>,
    pub meta_model: String,
    pub cv_folds: usize,
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StackingOutcome {
    pub record: TrainedModelRecord,
    pub report: StackingReport,
}

pub fn train_stacking(df: &DataFrame, params: &StackingParams, config: &WorkbenchConfig) -> Result<StackingOutcome> {
    if params.target_columns.is_empty() {
        return Err(WorkbenchError::MissingTargetColumns);
    }
    let dataset = Dataset::from_frame(df, &params.target_columns, params.feature_columns.as_deref())?;
    let rows = dataset.n_rows();
    let thresholds = &config.thresholds;
    let seed = params.random_state.unwrap_or(config.default_random_state);
    let started = Instant::now();

    if params.cv_folds < 2 {
        return Err(WorkbenchError::invalid_param("cv_folds", params.cv_folds, "must be at least 2"));
    }
    let cv_folds = thresholds.cv_folds_for(rows, params.cv_folds);
    let base = build_stacking_base(&params.base_models, rows, thresholds)?;
    let meta = build_stacking_meta(&params.meta_model, rows, thresholds)?;
    let base_names: Vec<String> = base.iter().map(|(name, _)| name.clone()).collect();

    let template = StackingRegressor::new(
        StackingConfig {
            n_folds: cv_folds,
            passthrough: false,
            seed: Some(seed),
        },
        base,
        meta,
    );

    info!(
        rows,
        targets = dataset.target_columns.len(),
        base = ?base_names,
        meta = %params.meta_model,
        cv_folds,
        "Training stacking ensemble"
    );

    let mut rng = seeded_rng(params.random_state);
    let mut metrics = BTreeMap::new();
    let mut models = BTreeMap::new();

    for (idx, target) in dataset.target_columns.iter().enumerate() {
        let y = dataset.target_owned(idx);
        match train_target(&template, &dataset.x, &y, cv_folds, seed, &mut rng, config) {
            Ok((ensemble, target_metrics)) => {
                info!(target = %target, r2 = target_metrics.r2, cv_mse = target_metrics.cv_score, "Stacking target trained");
                models.insert(target.clone(), Regressor::Stacking(Box::new(ensemble)));
                metrics.insert(target.clone(), UnitOutcome::Trained(target_metrics));
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Stacking failed for target");
                metrics.insert(target.clone(), UnitOutcome::failed(&e));
            }
        }
    }

    if models.is_empty() {
        let reasons: Vec<String> = metrics
            .iter()
            .filter_map(|(target, outcome)| outcome.error().map(|e| format!("{}: {}", target, e)))
            .collect();
        return Err(WorkbenchError::AllTargetsFailed(reasons.join("; ")));
    }

    let mut record_params = ParamMap::new();
    record_params.insert(
        "base_models".to_string(),
        ParamValue::List(base_names.iter().map(|n| ParamValue::from(n.as_str())).collect()),
    );
    record_params.insert("meta_model".to_string(), ParamValue::from(params.meta_model.as_str()));
    record_params.insert("cv_folds".to_string(), ParamValue::from(cv_folds));

    let record = TrainedModelRecord {
        model_id: Uuid::new_v4().to_string(),
        model: ModelHandle::from_targets(models, &dataset.target_columns)?,
        model_type: "StackingEnsemble".to_string(),
        model_name: "Stacking Ensemble".to_string(),
        feature_columns: dataset.feature_columns.clone(),
        target_columns: dataset.target_columns.clone(),
        params: record_params,
        details: RecordDetails::Stacking {
            base_models: base_names.clone(),
            meta_model: params.meta_model.clone(),
            cv_folds,
        },
        training_time: Utc::now(),
        data_shape: (df.height(), df.width()),
    };

    info!(
        model_id = %record.model_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Stacking ensemble trained"
    );

    let report = StackingReport {
        model_id: record.model_id.clone(),
        model_info: record.summary(),
        metrics,
        base_models: base_names,
        meta_model: params.meta_model.clone(),
        cv_folds,
        feature_columns: record.feature_columns.clone(),
        target_columns: record.target_columns.clone(),
    };
    Ok(StackingOutcome { record, report })
}

/// Fit one target's ensemble, cross-validate it (sampled above
/// `very_large_rows`) and score it in-sample (sampled above `huge_rows`).
fn train_target(
    template: &StackingRegressor,
    x: &Array2<f64>,
    y: &Array1<f64>,
    cv_folds: usize,
    seed: u64,
    rng: &mut rand_chacha::ChaCha8Rng,
    config: &WorkbenchConfig,
) -> Result<(StackingRegressor, StackingMetrics)> {
    let thresholds = &config.thresholds;
    let rows = x.nrows();

    let mut ensemble = template.unfitted();
    ensemble.fit(x, y)?;

    let unfitted = Regressor::Stacking(Box::new(template.unfitted()));
    let kfold = KFold::new(cv_folds).shuffled(seed);
    let cv = if thresholds.is_very_large(rows) {
        let sample = sample_indices(rows, thresholds.cv_sample_size(rows), rng);
        cross_val_score(&unfitted, &x.select(Axis(0), &sample), &y.select(Axis(0), &sample), &kfold)
    } else {
        cross_val_score(&unfitted, x, y, &kfold)
    };
    let (cv_score, cv_std, cv_error) = match cv {
        Ok(cv) => (cv.mean_mse(), cv.std_score, None),
        Err(e) => {
            warn!(error = %e, "Stacking cross-validation failed, recording a zero score");
            (0.0, 0.0, Some(e.to_string()))
        }
    };

    let in_sample = if rows > thresholds.huge_rows {
        let sample = sample_indices(rows, thresholds.eval_sample_size(rows), rng);
        let x_eval = x.select(Axis(0), &sample);
        RegressionMetrics::compute(&y.select(Axis(0), &sample), &ensemble.predict(&x_eval)?)?
    } else {
        RegressionMetrics::compute(y, &ensemble.predict(x)?)?
    };

    let metrics = StackingMetrics {
        mse: in_sample.mse,
        rmse: in_sample.rmse,
        mae: in_sample.mae,
        r2: in_sample.r2,
        cv_score,
        cv_std,
        cv_error,
    };
    Ok((ensemble, metrics))
}

/// Out-of-fold diagnostics for one base learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseLearnerPredictions {
    #[serde(flatten)]
    pub metrics: RegressionMetrics,
    /// Mean and std of the per-fold r2
    pub cv_mean: f64,
    pub cv_std: f64,
    pub predictions: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasePredictionsReport {
    pub cv_folds: usize,
    /// Target, then base learner key
    pub predictions: BTreeMap<String, BTreeMap<String, UnitOutcome<BaseLearnerPredictions>>>,
}

/// Out-of-fold predictions of every base learner for every target, scored
/// against the true values. Folds are shuffled with a fixed seed.
pub fn base_model_predictions(
    df: &DataFrame,
    params: &StackingParams,
    config: &WorkbenchConfig,
) -> Result<BasePredictionsReport> {
    if params.target_columns.is_empty() {
        return Err(WorkbenchError::MissingTargetColumns);
    }
    let dataset = Dataset::from_frame(df, &params.target_columns, params.feature_columns.as_deref())?;
    let rows = dataset.n_rows();
    let cv_folds = config.thresholds.cv_folds_for(rows, params.cv_folds);
    let base = build_stacking_base(&params.base_models, rows, &config.thresholds)?;
    let splits = KFold::new(cv_folds).shuffled(DIAGNOSTIC_SEED).split(rows)?;

    let mut predictions = BTreeMap::new();
    for (idx, target) in dataset.target_columns.iter().enumerate() {
        let y = dataset.target_owned(idx);
        let mut per_base = BTreeMap::new();
        for (name, learner) in &base {
            let outcome = out_of_fold(learner, &dataset.x, &y, &splits);
            if let Err(e) = &outcome {
                warn!(target = %target, base_model = %name, error = %e, "Base learner diagnostics failed");
            }
            per_base.insert(name.clone(), UnitOutcome::from(outcome));
        }
        predictions.insert(target.clone(), per_base);
    }

    Ok(BasePredictionsReport { cv_folds, predictions })
}

fn out_of_fold(
    learner: &Regressor,
    x: &Array2<f64>,
    y: &Array1<f64>,
    splits: &[crate::training::CVSplit],
) -> Result<BaseLearnerPredictions> {
    let mut oof = Array1::zeros(x.nrows());
    let mut fold_r2 = Vec::with_capacity(splits.len());
    for split in splits {
        let preds = fit_predict_fold(learner, x, y, split)?;
        let y_fold = y.select(Axis(0), &split.test_indices);
        fold_r2.push(RegressionMetrics::compute(&y_fold, &preds)?.r2);
        for (local, &row) in split.test_indices.iter().enumerate() {
            oof[row] = preds[local];
        }
    }
    let (cv_mean, cv_std) = mean_std(&fold_r2);
    Ok(BaseLearnerPredictions {
        metrics: RegressionMetrics::compute(y, &oof)?,
        cv_mean,
        cv_std,
        predictions: oof.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn linear_frame(n: usize) -> DataFrame {
        let x1: Vec<f64> = (0..n).map(|i| i as f64 / 10.0).collect();
        let x2: Vec<f64> = (0..n).map(|i| ((i * 7) % 13) as f64).collect();
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| 2.0 * a - 0.5 * b + 1.0).collect();
        df!("x1" => &x1, "x2" => &x2, "y" => &y).unwrap()
    }

    #[test]
    fn test_defaults_match_catalog() {
        let params = StackingParams::default();
        assert_eq!(params.base_models, vec!["rf", "gbr", "lr"]);
        assert_eq!(params.meta_model, "LinearRegression");
        assert_eq!(params.cv_folds, 5);
    }

    #[test]
    fn test_linear_stack_fits_linear_data() {
        let params = StackingParams {
            target_columns: vec!["y".into()],
            base_models: vec!["lr".into()],
            cv_folds: 3,
            random_state: Some(1),
            ..Default::default()
        };
        let outcome = train_stacking(&linear_frame(60), &params, &WorkbenchConfig::default()).unwrap();
        let metrics = outcome.report.metrics["y"].trained().unwrap();
        assert!(metrics.r2 > 0.999, "r2 = {}", metrics.r2);
        assert!(metrics.cv_score < 1e-6, "cv = {}", metrics.cv_score);
        assert!(metrics.cv_error.is_none());
        assert_eq!(outcome.record.model_type, "StackingEnsemble");
        assert!(matches!(outcome.record.model, ModelHandle::SingleModel(Regressor::Stacking(_))));
    }

    #[test]
    fn test_unknown_meta_model_is_rejected() {
        let params = StackingParams {
            target_columns: vec!["y".into()],
            meta_model: "Ridge".into(),
            ..Default::default()
        };
        let result = train_stacking(&linear_frame(30), &params, &WorkbenchConfig::default());
        assert!(matches!(result, Err(WorkbenchError::UnsupportedModelType(_))));
    }

    #[test]
    fn test_base_predictions_cover_every_row() {
        let params = StackingParams {
            target_columns: vec!["y".into()],
            base_models: vec!["lr".into(), "rf".into()],
            cv_folds: 4,
            ..Default::default()
        };
        let report = base_model_predictions(&linear_frame(40), &params, &WorkbenchConfig::default()).unwrap();
        let per_base = &report.predictions["y"];
        assert_eq!(per_base.len(), 2);
        let lr = per_base["lr"].trained().unwrap();
        assert_eq!(lr.predictions.len(), 40);
        assert!(lr.metrics.r2 > 0.999);
        assert!(lr.cv_mean > 0.999);
    }
}
