//! Integration test: session registry, boundary replies and persistence

use regression_workbench::automl::AutoMlParams;
use regression_workbench::config::WorkbenchConfig;
use regression_workbench::error::WorkbenchError;
use regression_workbench::persistence::{JsonModelStore, ModelStore};
use regression_workbench::reply::Reply;
use regression_workbench::session::Session;
use regression_workbench::stacking::StackingParams;
use regression_workbench::trainer::TrainParams;
use polars::prelude::*;
use serde_json::Value;
use std::path::PathBuf;

fn line_df(slope: f64, intercept: f64) -> DataFrame {
    let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| slope * v + intercept).collect();
    df!("x" => &x, "y" => &y).unwrap()
}

fn lr_params() -> TrainParams {
    TrainParams {
        model_type: "LinearRegression".into(),
        target_columns: vec!["y".into()],
        ..Default::default()
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("workbench-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn first_prediction(reply: &Reply) -> f64 {
    reply.get("predictions").unwrap()[0]["y_predicted"].as_f64().unwrap()
}

#[test]
fn test_explicit_id_never_uses_current_model() {
    let mut session = Session::default();
    let x_model = session.train_model(&line_df(2.0, 1.0), &lr_params()).unwrap();
    let y_model = session.train_model(&line_df(-3.0, 0.0), &lr_params()).unwrap();
    assert_eq!(session.current_model_id(), Some(y_model.model_id.as_str()));

    let query = df!("x" => &[10.0]).unwrap();
    let via_x = session.predict(Some(&x_model.model_id), &query, false).unwrap();
    let pred = via_x.predictions[0]["y_predicted"].as_f64().unwrap();
    assert!((pred - 21.0).abs() < 1e-6, "x model predicted {}", pred);

    let via_current = session.predict(None, &query, false).unwrap();
    let pred = via_current.predictions[0]["y_predicted"].as_f64().unwrap();
    assert!((pred + 30.0).abs() < 1e-6, "current model predicted {}", pred);
}

#[test]
fn test_unknown_model_id() {
    let mut session = Session::default();
    session.train_model(&line_df(1.0, 0.0), &lr_params()).unwrap();
    let result = session.predict(Some("missing"), &line_df(1.0, 0.0), false);
    assert!(matches!(result, Err(WorkbenchError::ModelNotFound(_))));
}

#[test]
fn test_every_reply_round_trips_through_json() {
    let mut session = Session::default();
    let df = line_df(2.0, 1.0);

    let mut replies = vec![
        Reply::from_result(session.train_model(&df, &lr_params()), "trained"),
        Reply::from_result(
            session.run_automl(
                &df,
                Some(&df),
                &AutoMlParams {
                    target_columns: vec!["y".into()],
                    models: Some(vec!["LinearRegression".into(), "RandomForest".into()]),
                    ..Default::default()
                },
            ),
            "automl",
        ),
    ];
    replies.push(Reply::from_result(session.model_comparison_report(None), "comparison"));
    replies.push(Reply::from_result(
        session.train_stacking(
            &df,
            &StackingParams {
                target_columns: vec!["y".into()],
                base_models: vec!["lr".into()],
                cv_folds: 3,
                ..Default::default()
            },
        ),
        "stacked",
    ));
    replies.push(Reply::from_result(session.predict(None, &df, true), "predicted"));
    replies.push(Reply::from_result(session.evaluate(None, &df), "evaluated"));
    replies.push(Reply::from_result(session.feature_importances(None), "importances"));
    replies.push(Reply::ok("history", &session.training_history()));
    replies.push(Reply::ok("status", &session.system_status()));
    replies.push(Reply::ok("models", &session.available_models()));
    replies.push(Reply::from_result(session.evaluate(Some("nope"), &df), "unused"));

    for reply in &replies[..replies.len() - 1] {
        assert!(reply.success, "{}", reply.message);
    }
    assert!(!replies[replies.len() - 1].success);

    for reply in replies {
        assert!(reply.to_json_pretty().is_ok());
        let value = serde_json::to_value(&reply).unwrap();
        let back: Reply = serde_json::from_value(value).unwrap();
        assert_eq!(back, reply);
    }
}

#[test]
fn test_history_and_status() {
    let mut session = Session::default();
    let first = session.train_model(&line_df(1.0, 1.0), &lr_params()).unwrap();
    session.train_model(&line_df(1.0, 2.0), &lr_params()).unwrap();

    let history = session.training_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].model_id, first.model_id);
    assert_eq!(history[0].model_type, "LinearRegression");
    assert!(history[0].metrics.get("validation").is_some());

    let status = session.system_status();
    assert_eq!(status.trained_models, 2);
    assert_eq!(status.training_history, 2);
    assert_eq!(session.list_models().len(), 2);
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = scratch_dir("persist");
    let store = JsonModelStore::new(&dir);

    let mut trainer_session = Session::default();
    let trained = trainer_session.train_model(&line_df(4.0, -2.0), &lr_params()).unwrap();
    let path = trainer_session.save_model(Some(&trained.model_id), &store).unwrap();
    assert_eq!(path, store.path_for(&trained.model_id));

    let mut session = Session::new(WorkbenchConfig::default().with_models_dir(&dir));
    let summary = session.load_model(&path, &store).unwrap();
    assert_eq!(summary.model_id, trained.model_id);
    assert_eq!(session.current_model_id(), Some(trained.model_id.as_str()));

    let reply = Reply::from_result(session.predict(None, &df!("x" => &[3.0]).unwrap(), false), "loaded");
    assert!((first_prediction(&reply) - 10.0).abs() < 1e-6);

    let missing = store.load(&dir.join("absent.json"));
    assert!(matches!(missing, Err(WorkbenchError::ModelNotFound(_))));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_include_features_merges_input_columns() {
    let mut session = Session::default();
    session.train_model(&line_df(1.0, 0.0), &lr_params()).unwrap();
    let query = df!("x" => &[1.0, 2.0], "note" => &["p", "q"]).unwrap();
    let reply = Reply::from_result(session.predict(None, &query, true), "predicted");
    assert!(reply.success, "{}", reply.message);

    let columns: Vec<&str> = reply.get("columns").unwrap().as_array().unwrap().iter().filter_map(Value::as_str).collect();
    assert_eq!(columns, vec!["x", "note", "y_predicted"]);
    assert_eq!(reply.get("prediction_count"), Some(&Value::from(2)));
    assert_eq!(reply.get("shape"), Some(&serde_json::json!([2, 3])));
}
