//! Integration test: AutoML competitions

use regression_workbench::automl::{run_automl, AutoMlParams, AutoMlReport};
use regression_workbench::config::WorkbenchConfig;
use regression_workbench::error::{UnitOutcome, WorkbenchError};
use regression_workbench::record::ModelHandle;
use regression_workbench::training::SearchMethod;
use polars::prelude::*;

fn linear_df(n: usize) -> DataFrame {
    let x1: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x2: Vec<f64> = (0..n).map(|i| ((i * 7) % 11) as f64).collect();
    let a: Vec<f64> = x1.iter().zip(&x2).map(|(p, q)| 2.0 * p - q + 1.0).collect();
    let b: Vec<f64> = x1.iter().zip(&x2).map(|(p, q)| 0.5 * p + 3.0 * q).collect();
    df!("x1" => &x1, "x2" => &x2, "a" => &a, "b" => &b).unwrap()
}

fn automl_params(targets: &[&str], models: &[&str]) -> AutoMlParams {
    AutoMlParams {
        target_columns: targets.iter().map(|t| t.to_string()).collect(),
        models: Some(models.iter().map(|m| m.to_string()).collect()),
        random_state: Some(11),
        ..Default::default()
    }
}

#[test]
fn test_winner_has_lowest_cv_mse() {
    let df = linear_df(60);
    let params = automl_params(&["a"], &["SVR", "RandomForest", "LinearRegression"]);
    let outcome = run_automl(&df, None, &params, &WorkbenchConfig::default());
    assert!(outcome.is_ok(), "AutoML should succeed: {:?}", outcome.err());
    let report = outcome.unwrap().report;

    let results = &report.results["a"];
    let scores: Vec<(String, f64)> = results
        .models
        .iter()
        .filter_map(|(name, outcome)| outcome.trained().map(|r| (name.clone(), r.cv_score)))
        .collect();
    assert_eq!(scores.len(), 3, "every family should train: {:?}", results.models);

    let (lowest, lowest_score) = scores
        .iter()
        .min_by(|x, y| x.1.partial_cmp(&y.1).unwrap())
        .unwrap();
    assert_eq!(lowest, "LinearRegression");
    assert!(*lowest_score < 1e-8, "linear cv mse = {}", lowest_score);
    for (name, score) in &scores {
        if name != lowest {
            assert!(score > lowest_score, "{} scored {} vs {}", name, score, lowest_score);
        }
    }

    let best = results.best_model.as_ref().unwrap();
    assert_eq!(&best.model_name, lowest);
    assert_eq!(report.best_models["a"].model_name, "LinearRegression");
    assert!((best.score + lowest_score).abs() < 1e-12);
}

#[test]
fn test_family_order_is_sorted_and_deduplicated() {
    let df = linear_df(40);
    let params = automl_params(&["a"], &["RandomForest", "LinearRegression", "RandomForest", "Nope"]);
    let report = run_automl(&df, None, &params, &WorkbenchConfig::default()).unwrap().report;
    assert_eq!(report.automl_config.models_tried, vec!["LinearRegression", "RandomForest"]);
    assert_eq!(report.results["a"].models.len(), 2);
}

#[test]
fn test_failing_target_is_isolated() {
    let mut df = linear_df(40);
    let broken: Vec<f64> = (0..40).map(|i| if i == 3 { f64::NAN } else { i as f64 }).collect();
    df.replace("a", Series::new("a".into(), broken)).unwrap();

    let params = automl_params(&["a", "b"], &["LinearRegression"]);
    let outcome = run_automl(&df, None, &params, &WorkbenchConfig::default());
    assert!(outcome.is_ok(), "partial AutoML should succeed: {:?}", outcome.err());
    let outcome = outcome.unwrap();

    let a = &outcome.report.results["a"];
    assert!(a.best_model.is_none());
    assert!(matches!(a.models["LinearRegression"], UnitOutcome::Failed { .. }));

    let b = outcome.report.results["b"].models["LinearRegression"].trained().unwrap();
    assert!(b.train_r2 > 0.999_999, "b r2 = {}", b.train_r2);
    assert!(!outcome.report.best_models.contains_key("a"));

    match &outcome.record.model {
        ModelHandle::MultiModel(models) => {
            assert!(models.contains_key("b"));
            assert!(!models.contains_key("a"));
        }
        ModelHandle::SingleModel(_) => panic!("two targets must give a multi-model handle"),
    }
}

#[test]
fn test_every_target_failing_is_an_error() {
    let df = df!("x" => &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], "y" => &[1.0, f64::NAN, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let params = AutoMlParams {
        cv_folds: 2,
        ..automl_params(&["y"], &["LinearRegression"])
    };
    let result = run_automl(&df, None, &params, &WorkbenchConfig::default());
    assert!(matches!(result, Err(WorkbenchError::AllTargetsFailed(_))));
}

#[test]
fn test_random_search_and_test_metrics() {
    let df = linear_df(50);
    let test_df = linear_df(20);
    let params = AutoMlParams {
        search_method: "random".into(),
        max_iter: 2,
        training_mode: "thorough".into(),
        ..automl_params(&["b"], &["LinearRegression", "GradientBoosting"])
    };
    let report = run_automl(&df, Some(&test_df), &params, &WorkbenchConfig::default())
        .unwrap()
        .report;
    assert_eq!(report.automl_config.search_method, SearchMethod::Random);

    let lr = report.results["b"].models["LinearRegression"].trained().unwrap();
    assert!(lr.test_r2.unwrap() > 0.999_999);
    assert!(lr.test_rmse.unwrap() < 1e-5);
}

#[test]
fn test_report_round_trips_through_json() {
    let df = linear_df(40);
    let params = automl_params(&["a", "b"], &["LinearRegression", "XGBoost"]);
    let report = run_automl(&df, None, &params, &WorkbenchConfig::default()).unwrap().report;

    let value = serde_json::to_value(&report).unwrap();
    let back: AutoMlReport = serde_json::from_value(value.clone()).unwrap();
    assert_eq!(serde_json::to_value(&back).unwrap(), value);
    assert_eq!(value["model_info"]["model_type"], "AutoML");
}
