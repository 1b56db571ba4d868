//! Session state: trained-model registry, current-model pointer and history
//!
//! Every training pathway registers its record under a fresh id and makes it
//! current. Lookups with an explicit id never consult the current pointer.
//! Everything returned from here is estimator-free.

use crate::automl::{self, AutoMlParams, AutoMlReport, ComparisonReport};
use crate::config::WorkbenchConfig;
use crate::error::{Result, WorkbenchError};
use crate::params::ParamMap;
use crate::persistence::ModelStore;
use crate::predict::{self, EvaluationReport, PredictionReport};
use crate::record::{RecordDetails, RecordSummary, TrainedModelRecord};
use crate::registry::{self, ModelInfo};
use crate::stacking::{self, BasePredictionsReport, StackingParams, StackingReport};
use crate::trainer::{self, TrainParams, TrainingMetrics};
use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

/// One successful training call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub model_type: String,
    pub model_id: String,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub trained_models: usize,
    pub current_model: Option<String>,
    pub training_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub model_id: String,
    pub model_info: RecordSummary,
    pub metrics: TrainingMetrics,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub best_params: BTreeMap<String, ParamMap>,
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportanceReport {
    pub model_id: String,
    /// Feature importances per target; `None` for families without them
    pub importances: BTreeMap<String, Option<BTreeMap<String, f64>>>,
}

#[derive(Debug, Default)]
pub struct Session {
    config: WorkbenchConfig,
    models: HashMap<String, TrainedModelRecord>,
    current: Option<String>,
    history: Vec<HistoryEntry>,
}

impl Session {
    pub fn new(config: WorkbenchConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub fn current_model_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn register(&mut self, record: TrainedModelRecord, metrics: serde_json::Value) -> String {
        let model_id = record.model_id.clone();
        self.history.push(HistoryEntry {
            timestamp: Utc::now(),
            model_type: record.model_type.clone(),
            model_id: model_id.clone(),
            metrics,
        });
        self.models.insert(model_id.clone(), record);
        self.current = Some(model_id.clone());
        info!(model_id = %model_id, registered = self.models.len(), "Model registered");
        model_id
    }

    pub fn train_model(&mut self, df: &DataFrame, params: &TrainParams) -> Result<TrainResponse> {
        let outcome = trainer::train_model(df, params, &self.config)?;
        let metrics = serde_json::to_value(&outcome.metrics)?;
        let response = TrainResponse {
            model_id: outcome.record.model_id.clone(),
            model_info: outcome.record.summary(),
            metrics: outcome.metrics,
            best_params: outcome.best_params,
            feature_columns: outcome.record.feature_columns.clone(),
            target_columns: outcome.record.target_columns.clone(),
        };
        self.register(outcome.record, metrics);
        Ok(response)
    }

    pub fn run_automl(
        &mut self,
        df: &DataFrame,
        test_df: Option<&DataFrame>,
        params: &AutoMlParams,
    ) -> Result<AutoMlReport> {
        let outcome = automl::run_automl(df, test_df, params, &self.config)?;
        let metrics = serde_json::to_value(&outcome.report.best_models)?;
        self.register(outcome.record, metrics);
        Ok(outcome.report)
    }

    pub fn train_stacking(&mut self, df: &DataFrame, params: &StackingParams) -> Result<StackingReport> {
        let outcome = stacking::train_stacking(df, params, &self.config)?;
        let metrics = serde_json::to_value(&outcome.report.metrics)?;
        self.register(outcome.record, metrics);
        Ok(outcome.report)
    }

    /// Out-of-fold base learner diagnostics; nothing is registered
    pub fn base_model_predictions(&self, df: &DataFrame, params: &StackingParams) -> Result<BasePredictionsReport> {
        stacking::base_model_predictions(df, params, &self.config)
    }

    /// The record for `model_id`, or the current one when no id is given
    pub fn record(&self, model_id: Option<&str>) -> Result<&TrainedModelRecord> {
        let id = match model_id {
            Some(id) => id,
            None => self
                .current
                .as_deref()
                .ok_or_else(|| WorkbenchError::ModelNotFound("no model has been trained".to_string()))?,
        };
        self.models
            .get(id)
            .ok_or_else(|| WorkbenchError::ModelNotFound(format!("model '{}' not found", id)))
    }

    pub fn model_info(&self, model_id: Option<&str>) -> Result<RecordSummary> {
        self.record(model_id).map(TrainedModelRecord::summary)
    }

    /// Summaries of every registered model, oldest first
    pub fn list_models(&self) -> Vec<RecordSummary> {
        let mut summaries: Vec<RecordSummary> = self.models.values().map(TrainedModelRecord::summary).collect();
        summaries.sort_by(|a, b| a.training_time.cmp(&b.training_time).then_with(|| a.model_id.cmp(&b.model_id)));
        summaries
    }

    pub fn predict(&self, model_id: Option<&str>, df: &DataFrame, include_features: bool) -> Result<PredictionReport> {
        predict::predict(self.record(model_id)?, df, include_features)
    }

    pub fn evaluate(&self, model_id: Option<&str>, df: &DataFrame) -> Result<EvaluationReport> {
        predict::evaluate(self.record(model_id)?, df)
    }

    pub fn available_models(&self) -> Vec<ModelInfo> {
        registry::available_models()
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            trained_models: self.models.len(),
            current_model: self.current.clone(),
            training_history: self.history.len(),
        }
    }

    pub fn training_history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn feature_importances(&self, model_id: Option<&str>) -> Result<FeatureImportanceReport> {
        let record = self.record(model_id)?;
        let mut importances = BTreeMap::new();
        for target in record.model.trained_targets(&record.target_columns) {
            let named = record.estimator(target)?.feature_importances().map(|values| {
                record
                    .feature_columns
                    .iter()
                    .cloned()
                    .zip(values.iter().copied())
                    .collect::<BTreeMap<String, f64>>()
            });
            importances.insert(target.clone(), named);
        }
        Ok(FeatureImportanceReport {
            model_id: record.model_id.clone(),
            importances,
        })
    }

    pub fn model_comparison_report(&self, model_id: Option<&str>) -> Result<ComparisonReport> {
        let record = self.record(model_id)?;
        match &record.details {
            RecordDetails::AutoMl { results, .. } => Ok(automl::comparison_report(results)),
            _ => Err(WorkbenchError::EvaluationFailure(format!(
                "model '{}' is a {} model, comparison reports need an AutoML model",
                record.model_id, record.model_type
            ))),
        }
    }

    /// Hand the full record (estimators included) to `store`
    pub fn save_model(&self, model_id: Option<&str>, store: &dyn ModelStore) -> Result<PathBuf> {
        store.save(self.record(model_id)?)
    }

    /// Register a stored record under its own id and make it current
    pub fn load_model(&mut self, path: &Path, store: &dyn ModelStore) -> Result<RecordSummary> {
        let record = store.load(path)?;
        let summary = record.summary();
        self.models.insert(record.model_id.clone(), record);
        self.current = Some(summary.model_id.clone());
        info!(model_id = %summary.model_id, "Model loaded into session");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn frame() -> DataFrame {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        df!("x" => &x, "y" => &y).unwrap()
    }

    fn lr_params() -> TrainParams {
        TrainParams {
            model_type: "LinearRegression".into(),
            target_columns: vec!["y".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_session_has_no_current_model() {
        let session = Session::default();
        assert!(matches!(session.record(None), Err(WorkbenchError::ModelNotFound(_))));
        assert_eq!(session.system_status().trained_models, 0);
    }

    #[test]
    fn test_failed_training_leaves_registry_untouched() {
        let mut session = Session::default();
        let first = session.train_model(&frame(), &lr_params()).unwrap();

        let bad = TrainParams {
            model_type: "Lasso".into(),
            ..lr_params()
        };
        assert!(session.train_model(&frame(), &bad).is_err());

        let status = session.system_status();
        assert_eq!(status.trained_models, 1);
        assert_eq!(status.training_history, 1);
        assert_eq!(status.current_model.as_deref(), Some(first.model_id.as_str()));
    }

    #[test]
    fn test_linear_importances_are_absolute_coefficients() {
        let mut session = Session::default();
        session.train_model(&frame(), &lr_params()).unwrap();
        let report = session.feature_importances(None).unwrap();
        let y = report.importances["y"].as_ref().unwrap();
        assert!((y["x"] - 2.0).abs() < 1e-8, "importance = {}", y["x"]);
    }

    #[test]
    fn test_comparison_report_requires_automl() {
        let mut session = Session::default();
        session.train_model(&frame(), &lr_params()).unwrap();
        let err = session.model_comparison_report(None).unwrap_err();
        assert!(matches!(err, WorkbenchError::EvaluationFailure(_)));
    }
}
