//! Hyperparameter validation, size-based tightening and grid merging

use crate::config::{DatasetScale, SizeThresholds};
use crate::params::{ParamGrid, ParamMap, ParamValue};
use crate::registry::ModelType;
use tracing::{debug, warn};

/// Keep only the keys `model` accepts. Dropped keys are logged, never passed on.
pub fn validate_params(model: ModelType, params: &ParamMap) -> ParamMap {
    let mut validated = ParamMap::new();
    for (key, value) in params {
        if model.accepts(key) {
            validated.insert(key.clone(), value.clone());
        } else {
            warn!(model = %model, param = %key, "Dropping unsupported hyperparameter");
        }
    }
    validated
}

/// Lower `key` to `cap` when absent, unlimited (`null`) or above the cap.
fn cap_int(params: &mut ParamMap, key: &str, cap: i64) {
    let keep = matches!(params.get(key).and_then(ParamValue::as_i64), Some(v) if v <= cap);
    if !keep {
        params.insert(key.to_string(), ParamValue::Int(cap));
    }
}

fn cap_float(params: &mut ParamMap, key: &str, cap: f64) {
    let keep = matches!(params.get(key).and_then(ParamValue::as_f64), Some(v) if v <= cap);
    if !keep {
        params.insert(key.to_string(), ParamValue::Float(cap));
    }
}

fn default_if_unset(params: &mut ParamMap, key: &str, value: ParamValue) {
    params.entry(key.to_string()).or_insert(value);
}

/// Tighten cost-driving parameters for large tables.
///
/// Standard tables pass through unchanged. Explicit user values already
/// stricter than a cap are kept.
pub fn optimize_for_size(
    model: ModelType,
    params: &ParamMap,
    rows: usize,
    thresholds: &SizeThresholds,
) -> ParamMap {
    let scale = thresholds.scale(rows);
    let mut p = params.clone();

    match (model, scale) {
        (_, DatasetScale::Standard) => return p,
        (ModelType::LinearRegression, _) => {}

        (ModelType::RandomForest, DatasetScale::Large) => {
            cap_int(&mut p, "n_estimators", 100);
            cap_int(&mut p, "max_depth", 20);
        }
        (ModelType::RandomForest, DatasetScale::VeryLarge) => {
            cap_int(&mut p, "n_estimators", 50);
            cap_int(&mut p, "max_depth", 15);
            default_if_unset(&mut p, "n_jobs", ParamValue::Int(-1));
        }

        (ModelType::GradientBoosting, DatasetScale::Large) => {
            cap_int(&mut p, "n_estimators", 100);
        }
        (ModelType::GradientBoosting, DatasetScale::VeryLarge) => {
            cap_int(&mut p, "n_estimators", 50);
            default_if_unset(&mut p, "learning_rate", ParamValue::Float(0.15));
            default_if_unset(&mut p, "max_depth", ParamValue::Int(5));
        }

        (ModelType::XGBoost, DatasetScale::Large) => {
            cap_int(&mut p, "n_estimators", 100);
            default_if_unset(&mut p, "tree_method", "hist".into());
        }
        (ModelType::XGBoost, DatasetScale::VeryLarge) => {
            cap_int(&mut p, "n_estimators", 50);
            default_if_unset(&mut p, "learning_rate", ParamValue::Float(0.15));
            default_if_unset(&mut p, "max_depth", ParamValue::Int(5));
            default_if_unset(&mut p, "n_jobs", ParamValue::Int(-1));
            p.insert("tree_method".to_string(), "hist".into());
        }

        (ModelType::SVR, DatasetScale::Large) => {}
        (ModelType::SVR, DatasetScale::VeryLarge) => {
            cap_float(&mut p, "cache_size", 2000.0);
            default_if_unset(&mut p, "C", ParamValue::Float(1.0));
            default_if_unset(&mut p, "gamma", "scale".into());
        }

        (ModelType::MLP, DatasetScale::Large) => {
            cap_int(&mut p, "max_iter", 300);
            p.insert("early_stopping".to_string(), true.into());
        }
        (ModelType::MLP, DatasetScale::VeryLarge) => {
            cap_int(&mut p, "max_iter", 200);
            p.insert("early_stopping".to_string(), true.into());
            default_if_unset(&mut p, "validation_fraction", ParamValue::Float(0.1));
            default_if_unset(&mut p, "n_iter_no_change", ParamValue::Int(10));
            default_if_unset(&mut p, "hidden_layer_sizes", ParamValue::layers(&[100]));
        }
    }

    debug!(model = %model, rows, ?scale, params = ?p, "Size-optimized parameters");
    p
}

/// Candidate list for one user value. A list is a set of candidates, except
/// for layer sizes where a flat integer list is a single architecture.
fn candidates(key: &str, value: &ParamValue) -> Vec<ParamValue> {
    match value {
        ParamValue::List(items) if key == "hidden_layer_sizes" => {
            if items.iter().all(|v| matches!(v, ParamValue::Int(_))) {
                vec![value.clone()]
            } else {
                items.clone()
            }
        }
        ParamValue::List(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Merge user values into the default search space of `model`. User keys
/// replace the defaults' candidates; accepted keys the defaults lack extend
/// the grid.
pub fn merge_grid(model: ModelType, user_params: &ParamMap) -> ParamGrid {
    let mut grid = model.default_grid();
    for (key, value) in user_params {
        if !model.accepts(key) {
            continue;
        }
        let values = candidates(key, value);
        if !values.is_empty() {
            grid.insert(key.clone(), values);
        }
    }
    grid
}
