//! Integration test: single-model training end-to-end

use regression_workbench::config::WorkbenchConfig;
use regression_workbench::error::WorkbenchError;
use regression_workbench::params::{ParamMap, ParamValue};
use regression_workbench::record::RecordDetails;
use regression_workbench::registry::ModelType;
use regression_workbench::trainer::{train_model, TrainParams};
use regression_workbench::tuning;
use polars::prelude::*;

fn linear_df(n: usize) -> DataFrame {
    let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
    let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
    df!("x" => &x, "y" => &y).unwrap()
}

fn regression_df() -> DataFrame {
    let x1: Vec<f64> = (0..40).map(|i| i as f64).collect();
    let x2: Vec<f64> = (0..40).map(|i| ((i * 11) % 17) as f64).collect();
    let a: Vec<f64> = x1.iter().zip(&x2).map(|(p, q)| 3.0 * p - q + 0.5).collect();
    let b: Vec<f64> = x1.iter().zip(&x2).map(|(p, q)| p + 2.0 * q).collect();
    df!("x1" => &x1, "x2" => &x2, "a" => &a, "b" => &b).unwrap()
}

fn params(model: &str, targets: &[&str]) -> TrainParams {
    TrainParams {
        model_type: model.to_string(),
        target_columns: targets.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

#[test]
fn test_direct_training_is_deterministic() {
    let df = regression_df();
    let mut model_params = ParamMap::new();
    model_params.insert("n_estimators".into(), ParamValue::Int(20));
    model_params.insert("random_state".into(), ParamValue::Int(7));
    let p = TrainParams {
        random_state: Some(3),
        model_params,
        ..params("RandomForest", &["a", "b"])
    };
    let config = WorkbenchConfig::default();

    let first = train_model(&df, &p, &config);
    assert!(first.is_ok(), "training should succeed: {:?}", first.err());
    let second = train_model(&df, &p, &config).unwrap();
    let first = first.unwrap();

    assert_eq!(first.metrics.train, second.metrics.train);
    assert_eq!(first.metrics.validation, second.metrics.validation);
    assert_eq!(first.metrics.cross_validation, second.metrics.cross_validation);
    assert_ne!(first.record.model_id, second.record.model_id);
}

#[test]
fn test_exact_linear_relationship() {
    let df = linear_df(50);
    let outcome = train_model(&df, &params("LinearRegression", &["y"]), &WorkbenchConfig::default()).unwrap();

    for metrics in outcome.metrics.train.values().chain(outcome.metrics.validation.values()) {
        assert!((metrics.r2 - 1.0).abs() < 1e-9, "r2 = {}", metrics.r2);
        assert!(metrics.mse < 1e-12, "mse = {}", metrics.mse);
        assert!((metrics.rmse - metrics.mse.sqrt()).abs() < 1e-15);
    }
    assert!(outcome.metrics.cross_validation["y"] < 1e-12);
}

#[test]
fn test_failing_target_aborts_single_model_training() {
    let mut df = regression_df();
    let broken: Vec<f64> = (0..40).map(|i| if i == 5 { f64::NAN } else { i as f64 }).collect();
    df.replace("a", Series::new("a".into(), broken)).unwrap();

    let result = train_model(&df, &params("LinearRegression", &["a", "b"]), &WorkbenchConfig::default());
    match result {
        Err(WorkbenchError::TrainingError(message)) => assert!(message.contains("'a'"), "{}", message),
        other => panic!("expected a training error, got {:?}", other.map(|o| o.record.model_id)),
    }
}

#[test]
fn test_multi_target_trains_one_estimator_each() {
    let outcome = train_model(&regression_df(), &params("GradientBoosting", &["a", "b"]), &WorkbenchConfig::default());
    assert!(outcome.is_ok(), "training should succeed: {:?}", outcome.err());
    let outcome = outcome.unwrap();
    assert!(outcome.record.estimator("a").is_ok());
    assert!(outcome.record.estimator("b").is_ok());
    assert_eq!(outcome.record.feature_columns, vec!["x1", "x2"]);
    assert_eq!(outcome.metrics.cross_validation.len(), 2);
}

#[test]
fn test_unknown_parameters_are_dropped_for_every_family() {
    let df = regression_df();
    for model in ModelType::ALL {
        let mut model_params = ParamMap::new();
        model_params.insert("foo_bar".into(), ParamValue::Int(1));
        let p = TrainParams {
            model_params,
            ..params(model.key(), &["a"])
        };
        let result = train_model(&df, &p, &WorkbenchConfig::default());
        assert!(result.is_ok(), "{} should train: {:?}", model, result.err());
        assert!(!result.unwrap().record.params.contains_key("foo_bar"));
    }
}

#[test]
fn test_size_boundary_switches_fold_count() {
    let config = WorkbenchConfig::default();
    for (rows, expected_folds) in [(14_999, 5), (15_001, 3)] {
        let outcome = train_model(&linear_df(rows), &params("LinearRegression", &["y"]), &config);
        assert!(outcome.is_ok(), "{} rows: {:?}", rows, outcome.err());
        match outcome.unwrap().record.details {
            RecordDetails::SingleModel { cv_folds, test_size, .. } => {
                assert_eq!(cv_folds, expected_folds, "{} rows", rows);
                assert_eq!(test_size, 0.15);
            }
            other => panic!("unexpected details {:?}", other),
        }
    }
}

#[test]
fn test_size_boundary_switches_parameters() {
    let thresholds = WorkbenchConfig::default().thresholds;
    let mut user = ParamMap::new();
    user.insert("n_estimators".into(), ParamValue::Int(300));

    let small = tuning::optimize_for_size(ModelType::RandomForest, &user, 14_999, &thresholds);
    assert_eq!(small, user);

    let large = tuning::optimize_for_size(ModelType::RandomForest, &user, 15_001, &thresholds);
    assert_eq!(large["n_estimators"], ParamValue::Int(100));
}

#[test]
fn test_missing_targets_reported_before_work() {
    let result = train_model(&regression_df(), &params("RandomForest", &[]), &WorkbenchConfig::default());
    assert!(matches!(result, Err(WorkbenchError::MissingTargetColumns)));

    let result = train_model(&regression_df(), &params("Ridge", &["a"]), &WorkbenchConfig::default());
    assert!(matches!(result, Err(WorkbenchError::UnsupportedModelType(_))));
}

#[test]
fn test_multi_target_grid_search_keeps_each_winner() {
    let p = TrainParams {
        use_grid_search: true,
        ..params("LinearRegression", &["a", "b"])
    };
    let outcome = train_model(&regression_df(), &p, &WorkbenchConfig::default()).unwrap();
    let grid = ModelType::LinearRegression.default_grid();

    assert_eq!(outcome.best_params.len(), 2);
    for (target, best) in &outcome.best_params {
        for (key, value) in best {
            assert!(grid[key].contains(value), "{}: {} = {:?} not in grid", target, key, value);
        }
    }
    // a has a negative coefficient
    assert_eq!(outcome.best_params["a"]["positive"], ParamValue::Bool(false));

    match &outcome.record.details {
        RecordDetails::SingleModel { best_params, .. } => assert_eq!(best_params, &outcome.best_params),
        other => panic!("unexpected details {:?}", other),
    }
    let summary = outcome.record.summary();
    assert_eq!(summary.best_params, outcome.best_params);

    let value = serde_json::to_value(&outcome.record).unwrap();
    let back: regression_workbench::record::TrainedModelRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back.summary().best_params, outcome.best_params);
}
