//! Trained-model records
//!
//! A record owns the fitted estimator(s) and is only ever handed out by id.
//! [`RecordSummary`] is the estimator-free view that crosses the boundary.

use crate::automl::{AutoMlSettings, TargetResults};
use crate::error::{Result, WorkbenchError};
use crate::params::ParamMap;
use crate::training::Regressor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One estimator for a single target, or one per target name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelHandle {
    SingleModel(Regressor),
    MultiModel(BTreeMap<String, Regressor>),
}

impl ModelHandle {
    /// Single-target tables get `SingleModel`, anything else `MultiModel`.
    pub fn from_targets(mut models: BTreeMap<String, Regressor>, target_columns: &[String]) -> Result<Self> {
        if target_columns.len() == 1 {
            let only = models.remove(&target_columns[0]).ok_or_else(|| {
                WorkbenchError::TrainingError(format!("no model trained for '{}'", target_columns[0]))
            })?;
            Ok(ModelHandle::SingleModel(only))
        } else {
            Ok(ModelHandle::MultiModel(models))
        }
    }

    /// Estimator predicting `target`
    pub fn estimator(&self, target: &str) -> Option<&Regressor> {
        match self {
            ModelHandle::SingleModel(model) => Some(model),
            ModelHandle::MultiModel(models) => models.get(target),
        }
    }

    /// Targets with an estimator, in `target_columns` order
    pub fn trained_targets<'a>(&self, target_columns: &'a [String]) -> Vec<&'a String> {
        match self {
            ModelHandle::SingleModel(_) => target_columns.iter().take(1).collect(),
            ModelHandle::MultiModel(models) => target_columns
                .iter()
                .filter(|t| models.contains_key(t.as_str()))
                .collect(),
        }
    }
}

/// Pathway-specific facts kept with a record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetails {
    SingleModel {
        use_grid_search: bool,
        test_size: f64,
        cv_folds: usize,
        /// Search winner per target; empty without grid search
        #[serde(default)]
        best_params: BTreeMap<String, ParamMap>,
    },
    #[serde(rename = "automl")]
    AutoMl {
        config: AutoMlSettings,
        results: BTreeMap<String, TargetResults>,
    },
    Stacking {
        base_models: Vec<String>,
        meta_model: String,
        cv_folds: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModelRecord {
    pub model_id: String,
    pub model: ModelHandle,
    /// Registry key, `AutoML` or `StackingEnsemble`
    pub model_type: String,
    pub model_name: String,
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
    pub params: ParamMap,
    pub details: RecordDetails,
    pub training_time: DateTime<Utc>,
    /// (rows, columns) of the training table
    pub data_shape: (usize, usize),
}

/// Everything about a record except its estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub model_id: String,
    pub model_type: String,
    pub model_name: String,
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
    pub params: ParamMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub best_params: BTreeMap<String, ParamMap>,
    pub training_time: DateTime<Utc>,
    pub data_shape: (usize, usize),
}

impl TrainedModelRecord {
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            model_id: self.model_id.clone(),
            model_type: self.model_type.clone(),
            model_name: self.model_name.clone(),
            feature_columns: self.feature_columns.clone(),
            target_columns: self.target_columns.clone(),
            params: self.params.clone(),
            best_params: match &self.details {
                RecordDetails::SingleModel { best_params, .. } => best_params.clone(),
                _ => BTreeMap::new(),
            },
            training_time: self.training_time,
            data_shape: self.data_shape,
        }
    }

    /// Estimator for `target`, or `EvaluationFailure` when the record has none
    pub fn estimator(&self, target: &str) -> Result<&Regressor> {
        self.model.estimator(target).ok_or_else(|| {
            WorkbenchError::EvaluationFailure(format!(
                "model {} has no estimator for target '{}'",
                self.model_id, target
            ))
        })
    }
}
