//! AutoML orchestrator
//!
//! For every target, each requested model family competes through grid or
//! randomized search; the family with the best cross-validated score wins the
//! target. Family failures are recorded inline and never stop their siblings.

use crate::config::WorkbenchConfig;
use crate::data::{columns_to_array2, sample_indices, seeded_rng, Dataset};
use crate::error::{Result, UnitOutcome, WorkbenchError};
use crate::metrics::{mean_std, RegressionMetrics};
use crate::params::{ParamGrid, ParamMap};
use crate::record::{ModelHandle, RecordDetails, RecordSummary, TrainedModelRecord};
use crate::registry::{automl_grid, ModelType, TrainingMode};
use crate::training::{search, Regressor, SearchConfig, SearchMethod};
use chrono::Utc;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::DataFrame;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// The only scoring AutoML ranks by
pub const NEG_MSE_SCORING: &str = "neg_mean_squared_error";

/// Randomized search never samples more candidates than this
const RANDOM_SEARCH_MAX_CANDIDATES: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMlParams {
    pub target_columns: Vec<String>,
    pub feature_columns: Option<Vec<String>>,
    /// `grid` or `random`
    pub search_method: String,
    pub cv_folds: usize,
    pub scoring: String,
    /// `fast` or `thorough`
    pub training_mode: String,
    /// Candidate cap for randomized search
    pub max_iter: usize,
    /// Registry keys to try; all families when `None`
    pub models: Option<Vec<String>>,
    /// Seed for the large-table samples
    pub random_state: Option<u64>,
}

impl Default for AutoMlParams {
    fn default() -> Self {
        Self {
            target_columns: Vec::new(),
            feature_columns: None,
            search_method: "grid".to_string(),
            cv_folds: 5,
            scoring: NEG_MSE_SCORING.to_string(),
            training_mode: "fast".to_string(),
            max_iter: 50,
            models: None,
            random_state: None,
        }
    }
}

/// Settings actually used after the size policy ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMlSettings {
    pub search_method: SearchMethod,
    pub cv_folds: usize,
    pub models_tried: Vec<String>,
    pub scoring: String,
    pub training_mode: TrainingMode,
    pub max_iter: usize,
}

/// One family's search result for one target. `cv_score` is a positive MSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyResult {
    pub model_name: String,
    pub best_params: ParamMap,
    pub cv_score: f64,
    pub train_r2: f64,
    pub train_mse: f64,
    pub train_rmse: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_r2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_mse: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_rmse: Option<f64>,
}

/// Winning family for a target. `score` is the search's negative MSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestModel {
    pub model_name: String,
    pub params: ParamMap,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetResults {
    /// Keyed by registry key
    pub models: BTreeMap<String, UnitOutcome<FamilyResult>>,
    pub best_model: Option<BestModel>,
}

/// Estimator-free AutoML response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMlReport {
    pub model_id: String,
    pub model_info: RecordSummary,
    pub automl_config: AutoMlSettings,
    pub results: BTreeMap<String, TargetResults>,
    pub best_models: BTreeMap<String, BestModel>,
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AutoMlOutcome {
    pub record: TrainedModelRecord,
    pub report: AutoMlReport,
}

/// Requested families, sorted and de-duplicated. Unknown names are skipped.
pub fn resolve_models(requested: Option<&[String]>) -> Result<Vec<ModelType>> {
    let Some(requested) = requested else {
        let mut all = ModelType::ALL.to_vec();
        all.sort_by_key(|m| m.key());
        return Ok(all);
    };

    let mut names: Vec<&String> = requested.iter().collect();
    names.sort();
    names.dedup();

    let mut models = Vec::new();
    for name in names {
        match name.parse::<ModelType>() {
            Ok(model) if !models.contains(&model) => models.push(model),
            Ok(_) => {}
            Err(_) => warn!(model = %name, "Unknown AutoML model family skipped"),
        }
    }
    if models.is_empty() {
        return Err(WorkbenchError::UnsupportedModelType(format!(
            "none of {:?} is a known model family",
            requested
        )));
    }
    Ok(models)
}

/// Search settings after the large-table policy
fn resolve_settings(params: &AutoMlParams, models: &[ModelType], rows: usize, config: &WorkbenchConfig) -> Result<AutoMlSettings> {
    if params.scoring != NEG_MSE_SCORING {
        return Err(WorkbenchError::invalid_param(
            "scoring",
            &params.scoring,
            "only neg_mean_squared_error is supported",
        ));
    }
    if params.cv_folds < 2 {
        return Err(WorkbenchError::invalid_param("cv_folds", params.cv_folds, "must be at least 2"));
    }
    let thresholds = &config.thresholds;
    let mut settings = AutoMlSettings {
        search_method: params.search_method.parse()?,
        cv_folds: params.cv_folds,
        models_tried: models.iter().map(|m| m.key().to_string()).collect(),
        scoring: params.scoring.clone(),
        training_mode: params.training_mode.parse()?,
        max_iter: params.max_iter.max(1),
    };
    if thresholds.is_large(rows) {
        settings.cv_folds = settings.cv_folds.min(thresholds.large_cv_folds);
        settings.max_iter = settings.max_iter.min(thresholds.large_max_iter);
        settings.training_mode = TrainingMode::Fast;
    }
    Ok(settings)
}

/// Rows and data a family searches over for one target
struct SearchData {
    x: Array2<f64>,
    y: Array1<f64>,
    sampled: bool,
}

pub fn run_automl(
    df: &DataFrame,
    test_df: Option<&DataFrame>,
    params: &AutoMlParams,
    config: &WorkbenchConfig,
) -> Result<AutoMlOutcome> {
    if params.target_columns.is_empty() {
        return Err(WorkbenchError::MissingTargetColumns);
    }
    let models = resolve_models(params.models.as_deref())?;
    let dataset = Dataset::from_frame(df, &params.target_columns, params.feature_columns.as_deref())?;
    let rows = dataset.n_rows();
    let thresholds = &config.thresholds;
    let settings = resolve_settings(params, &models, rows, config)?;
    let large = thresholds.is_large(rows);
    let started = Instant::now();

    let search_config = SearchConfig {
        method: settings.search_method,
        cv_folds: settings.cv_folds,
        n_iter: settings.max_iter.min(RANDOM_SEARCH_MAX_CANDIDATES),
        n_jobs: if large { Some(1) } else { None },
        random_state: config.default_random_state,
    };

    info!(
        rows,
        targets = dataset.target_columns.len(),
        families = models.len(),
        search = ?settings.search_method,
        mode = ?settings.training_mode,
        cv_folds = settings.cv_folds,
        "Starting AutoML"
    );

    let mut rng = seeded_rng(params.random_state);
    let mut results = BTreeMap::new();
    let mut winners: BTreeMap<String, Regressor> = BTreeMap::new();
    let mut best_models = BTreeMap::new();

    for (idx, target) in dataset.target_columns.iter().enumerate() {
        let y = dataset.target_owned(idx);
        let data = if large {
            let sample = sample_indices(rows, thresholds.search_sample_size(rows), &mut rng);
            info!(target = %target, sample = sample.len(), rows, "Searching on a row sample");
            SearchData {
                x: dataset.x.select(Axis(0), &sample),
                y: y.select(Axis(0), &sample),
                sampled: sample.len() < rows,
            }
        } else {
            SearchData {
                x: dataset.x.clone(),
                y: y.clone(),
                sampled: false,
            }
        };
        let test = match test_df {
            Some(test_df) => test_split(test_df, &dataset.feature_columns, target),
            None => None,
        };

        let mut target_results = TargetResults::default();
        let mut best: Option<(ModelType, f64, ParamMap, Regressor)> = None;

        for &model in &models {
            let grid = automl_grid(model, settings.training_mode, rows, thresholds);
            let trained = train_family(model, &grid, &dataset.x, &y, &data, test.as_ref(), &search_config, &mut rng, config);
            let outcome = match trained {
                Ok((result, score, estimator)) => {
                    info!(target = %target, model = %model, cv_mse = result.cv_score, "Family trained");
                    if best.as_ref().map_or(true, |(_, b, _, _)| score > *b) {
                        best = Some((model, score, result.best_params.clone(), estimator));
                    }
                    UnitOutcome::Trained(result)
                }
                Err(e) => {
                    warn!(target = %target, model = %model, error = %e, "Model family failed");
                    UnitOutcome::failed(&e)
                }
            };
            target_results.models.insert(model.key().to_string(), outcome);
        }

        if let Some((model, score, params, estimator)) = best {
            let best_model = BestModel {
                model_name: model.key().to_string(),
                params,
                score,
            };
            info!(target = %target, winner = %model, score, "Target winner selected");
            target_results.best_model = Some(best_model.clone());
            best_models.insert(target.clone(), best_model);
            winners.insert(target.clone(), estimator);
        } else {
            warn!(target = %target, "Every model family failed for target");
        }
        results.insert(target.clone(), target_results);
    }

    if winners.is_empty() {
        return Err(WorkbenchError::AllTargetsFailed(
            "no model family trained successfully for any target".to_string(),
        ));
    }

    let handle = ModelHandle::from_targets(winners, &dataset.target_columns)?;
    let record_params = match dataset.target_columns.as_slice() {
        [only] => best_models.get(only).map(|b| b.params.clone()).unwrap_or_default(),
        _ => ParamMap::new(),
    };

    let record = TrainedModelRecord {
        model_id: Uuid::new_v4().to_string(),
        model: handle,
        model_type: "AutoML".to_string(),
        model_name: "AutoML Best Model".to_string(),
        feature_columns: dataset.feature_columns.clone(),
        target_columns: dataset.target_columns.clone(),
        params: record_params,
        details: RecordDetails::AutoMl {
            config: settings.clone(),
            results: results.clone(),
        },
        training_time: Utc::now(),
        data_shape: (df.height(), df.width()),
    };

    info!(
        model_id = %record.model_id,
        winners = best_models.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "AutoML finished"
    );

    let report = AutoMlReport {
        model_id: record.model_id.clone(),
        model_info: record.summary(),
        automl_config: settings,
        results,
        best_models,
        feature_columns: record.feature_columns.clone(),
        target_columns: record.target_columns.clone(),
    };
    Ok(AutoMlOutcome { record, report })
}

/// Test rows for `target`, when the test table carries that target
fn test_split(test_df: &DataFrame, features: &[String], target: &str) -> Option<Result<(Array2<f64>, Array1<f64>)>> {
    let target_col = [target.to_string()];
    if test_df.column(target).is_err() {
        return None;
    }
    let split = columns_to_array2(test_df, features).and_then(|x| {
        let y = columns_to_array2(test_df, &target_col)?.column(0).to_owned();
        Ok((x, y))
    });
    Some(split)
}

/// Search one family, refit on the full table when the search was sampled,
/// and score train (and test) partitions.
#[allow(clippy::too_many_arguments)]
fn train_family(
    model: ModelType,
    grid: &ParamGrid,
    x_full: &Array2<f64>,
    y_full: &Array1<f64>,
    data: &SearchData,
    test: Option<&Result<(Array2<f64>, Array1<f64>)>>,
    search_config: &SearchConfig,
    rng: &mut ChaCha8Rng,
    config: &WorkbenchConfig,
) -> Result<(FamilyResult, f64, Regressor)> {
    let outcome = search(model, grid, &data.x, &data.y, search_config)?;

    let estimator = if data.sampled {
        let mut refit = Regressor::from_params(model, &outcome.best_params)?;
        refit.fit(x_full, y_full)?;
        refit
    } else {
        outcome.best_estimator
    };

    let rows = x_full.nrows();
    let train = if config.thresholds.is_very_large(rows) {
        let sample = sample_indices(rows, config.thresholds.eval_sample_size(rows), rng);
        let x_eval = x_full.select(Axis(0), &sample);
        let y_eval = y_full.select(Axis(0), &sample);
        RegressionMetrics::compute(&y_eval, &estimator.predict(&x_eval)?)?
    } else {
        RegressionMetrics::compute(y_full, &estimator.predict(x_full)?)?
    };

    let test_metrics = match test {
        Some(Ok((x_test, y_test))) => Some(RegressionMetrics::compute(y_test, &estimator.predict(x_test)?)?),
        Some(Err(e)) => {
            return Err(WorkbenchError::EvaluationFailure(format!("test table: {}", e)));
        }
        None => None,
    };

    let result = FamilyResult {
        model_name: model.display_name().to_string(),
        best_params: outcome.best_params,
        cv_score: -outcome.best_score,
        train_r2: train.r2,
        train_mse: train.mse,
        train_rmse: train.rmse,
        test_r2: test_metrics.map(|m| m.r2),
        test_mse: test_metrics.map(|m| m.mse),
        test_rmse: test_metrics.map(|m| m.rmse),
    };
    Ok((result, outcome.best_score, estimator))
}

/// One row of the comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub target: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_r2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_r2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestOverallModel {
    pub model_name: String,
    pub average_cv_score: f64,
    pub score_std: f64,
    pub targets_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_models_trained: usize,
    pub targets_processed: usize,
    pub best_overall_model: Option<BestOverallModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub comparison_table: Vec<ComparisonRow>,
    pub summary: ComparisonSummary,
}

/// Flatten AutoML results into a table and pick the family with the lowest
/// mean cross-validated MSE across targets.
pub fn comparison_report(results: &BTreeMap<String, TargetResults>) -> ComparisonReport {
    let mut table = Vec::new();
    let mut per_family: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

    for (target, target_results) in results {
        for (model, outcome) in &target_results.models {
            let row = match outcome {
                UnitOutcome::Trained(r) => {
                    per_family.entry(model.as_str()).or_default().push(r.cv_score);
                    ComparisonRow {
                        target: target.clone(),
                        model: model.clone(),
                        cv_score: Some(r.cv_score),
                        train_r2: Some(r.train_r2),
                        train_rmse: Some(r.train_rmse),
                        test_r2: r.test_r2,
                        test_rmse: r.test_rmse,
                        error: None,
                    }
                }
                UnitOutcome::Failed { error, .. } => ComparisonRow {
                    target: target.clone(),
                    model: model.clone(),
                    cv_score: None,
                    train_r2: None,
                    train_rmse: None,
                    test_r2: None,
                    test_rmse: None,
                    error: Some(error.clone()),
                },
            };
            table.push(row);
        }
    }

    let mut best_overall: Option<BestOverallModel> = None;
    for (model, scores) in &per_family {
        let (mean, std) = mean_std(scores);
        if best_overall.as_ref().map_or(true, |b| mean < b.average_cv_score) {
            best_overall = Some(BestOverallModel {
                model_name: model.to_string(),
                average_cv_score: mean,
                score_std: std,
                targets_count: scores.len(),
            });
        }
    }

    ComparisonReport {
        summary: ComparisonSummary {
            total_models_trained: table.iter().filter(|r| r.error.is_none()).count(),
            targets_processed: results.len(),
            best_overall_model: best_overall,
        },
        comparison_table: table,
    }
}
