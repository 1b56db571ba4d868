//! Error types for the regression workbench

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for workbench operations
pub type Result<T> = std::result::Result<T, WorkbenchError>;

/// Main error type for the workbench
#[derive(Error, Debug)]
pub enum WorkbenchError {
    #[error("Unsupported model type: {0}")]
    UnsupportedModelType(String),

    #[error("Target columns not specified")]
    MissingTargetColumns,

    #[error("No training data available: {0}")]
    MissingTrainingData(String),

    #[error("Evaluation failed: {0}")]
    EvaluationFailure(String),

    #[error("Cross-validation failed: {0}")]
    CrossValidationFailure(String),

    #[error("Training failed for every target: {0}")]
    AllTargetsFailed(String),

    #[error("No trained model available: {0}")]
    ModelNotFound(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Metric error: {0}")]
    MetricError(String),

    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),
}

impl WorkbenchError {
    pub(crate) fn invalid_param(name: &str, value: impl std::fmt::Display, reason: &str) -> Self {
        WorkbenchError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<polars::error::PolarsError> for WorkbenchError {
    fn from(err: polars::error::PolarsError) -> Self {
        WorkbenchError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for WorkbenchError {
    fn from(err: serde_json::Error) -> Self {
        WorkbenchError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for WorkbenchError {
    fn from(err: ndarray::ShapeError) -> Self {
        WorkbenchError::ShapeError {
            expected: "compatible shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for WorkbenchError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        WorkbenchError::ThreadPoolError(err.to_string())
    }
}

/// Marker serialized as `"failed"` next to a unit's error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Failed,
}

/// Result of one isolated unit of work (one model family, one target).
///
/// Serialized as the payload itself or as `{error, status: "failed"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnitOutcome<T> {
    Failed { error: String, status: UnitStatus },
    Trained(T),
}

impl<T> UnitOutcome<T> {
    pub fn failed(error: &WorkbenchError) -> Self {
        UnitOutcome::Failed {
            error: error.to_string(),
            status: UnitStatus::Failed,
        }
    }

    pub fn trained(&self) -> Option<&T> {
        match self {
            UnitOutcome::Trained(value) => Some(value),
            UnitOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            UnitOutcome::Failed { error, .. } => Some(error),
            UnitOutcome::Trained(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitOutcome::Failed { .. })
    }
}

impl<T> From<Result<T>> for UnitOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => UnitOutcome::Trained(value),
            Err(e) => UnitOutcome::failed(&e),
        }
    }
}
