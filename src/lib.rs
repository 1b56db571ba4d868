//! Regression Workbench - regression training and model selection core
//!
//! Turns a clean feature/target table into trained regression models through
//! four pathways, all registered in one [`session::Session`]:
//! - direct fits and grid-searched fits of a single family
//! - AutoML competitions across families, one winner per target
//! - stacking ensembles of base learners and a meta learner
//!
//! Training adapts to the table size: above configurable row thresholds it
//! samples, reduces folds and tightens hyperparameters.
//!
//! # Modules
//!
//! ## Core
//! - [`training`] - Estimators, cross-validation and hyperparameter search
//! - [`ensemble`] - Stacking regressor
//! - [`registry`] - Model families and their search spaces
//! - [`tuning`] - Parameter validation and size-based tightening
//! - [`metrics`] - Regression metrics
//!
//! ## Orchestration
//! - [`trainer`] - Single-model trainer
//! - [`automl`] - AutoML orchestrator
//! - [`stacking`] - Stacking orchestrator
//! - [`predict`] - Prediction and evaluation
//! - [`session`] - Trained-model registry and session operations
//!
//! ## Infrastructure
//! - [`config`] - Thresholds and defaults
//! - [`persistence`] - Model store
//! - [`reply`] - `{success, message, ...}` boundary shape
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core ML modules
pub mod data;
pub mod ensemble;
pub mod metrics;
pub mod params;
pub mod registry;
pub mod training;
pub mod tuning;

// Orchestration
pub mod automl;
pub mod predict;
pub mod record;
pub mod session;
pub mod stacking;
pub mod trainer;

// Infrastructure
pub mod config;
pub mod persistence;
pub mod reply;

// Services
pub mod cli;

pub use error::{Result, UnitOutcome, WorkbenchError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, UnitOutcome, WorkbenchError};

    // Configuration
    pub use crate::config::{DatasetScale, SizeThresholds, WorkbenchConfig};

    // Parameters and registry
    pub use crate::params::{ParamGrid, ParamMap, ParamValue};
    pub use crate::registry::{available_models, ModelInfo, ModelType, TrainingMode};

    // Training
    pub use crate::metrics::RegressionMetrics;
    pub use crate::training::{Regressor, SearchMethod};

    // Orchestrators
    pub use crate::automl::{AutoMlParams, AutoMlReport, ComparisonReport};
    pub use crate::stacking::{StackingParams, StackingReport};
    pub use crate::trainer::{TrainParams, TrainingMetrics};

    // Session
    pub use crate::persistence::{JsonModelStore, ModelStore};
    pub use crate::record::{ModelHandle, RecordSummary, TrainedModelRecord};
    pub use crate::reply::Reply;
    pub use crate::session::Session;
}
