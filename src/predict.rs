//! Prediction and evaluation against a stored record

use crate::data::{columns_to_array2, missing_columns};
use crate::error::{Result, WorkbenchError};
use crate::metrics::RegressionMetrics;
use crate::record::TrainedModelRecord;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Row-oriented predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    pub predictions: Vec<Map<String, Value>>,
    /// (rows, columns) of `predictions`
    pub shape: (usize, usize),
    pub columns: Vec<String>,
    pub prediction_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfoSummary {
    pub model_type: String,
    pub model_name: String,
    pub training_time: DateTime<Utc>,
    pub feature_count: usize,
    pub target_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluation: BTreeMap<String, RegressionMetrics>,
    pub model_info: ModelInfoSummary,
}

pub fn prediction_column(target: &str) -> String {
    format!("{}_predicted", target)
}

fn require_columns(df: &DataFrame, required: &[String], what: &str) -> Result<()> {
    let missing = missing_columns(df, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkbenchError::EvaluationFailure(format!(
            "missing {} columns: {}",
            what,
            missing.join(", ")
        )))
    }
}

/// Feature matrix in the record's column order, located by name
fn feature_matrix(record: &TrainedModelRecord, df: &DataFrame) -> Result<Array2<f64>> {
    require_columns(df, &record.feature_columns, "feature")?;
    columns_to_array2(df, &record.feature_columns)
}

/// Predictions per trained target, in `target_columns` order
fn predict_targets(record: &TrainedModelRecord, x: &Array2<f64>) -> Result<Vec<(String, Array1<f64>)>> {
    record
        .model
        .trained_targets(&record.target_columns)
        .into_iter()
        .map(|target| {
            let preds = record.estimator(target)?.predict(x)?;
            Ok((target.clone(), preds))
        })
        .collect()
}

pub fn predict(record: &TrainedModelRecord, df: &DataFrame, include_features: bool) -> Result<PredictionReport> {
    let x = feature_matrix(record, df)?;
    let predicted = predict_targets(record, &x)?;
    let rows = df.height();

    let mut rows_out: Vec<Map<String, Value>> = vec![Map::new(); rows];
    let mut columns = Vec::new();

    if include_features {
        for column in df.get_columns() {
            let name = column.name().to_string();
            let values = column_values(column)?;
            for (row, value) in rows_out.iter_mut().zip(values) {
                row.insert(name.clone(), value);
            }
            columns.push(name);
        }
    }
    for (target, preds) in &predicted {
        let name = prediction_column(target);
        for (row, value) in rows_out.iter_mut().zip(preds.iter()) {
            row.insert(name.clone(), Value::from(*value));
        }
        columns.push(name);
    }

    info!(model_id = %record.model_id, rows, targets = predicted.len(), "Predictions made");

    Ok(PredictionReport {
        shape: (rows, columns.len()),
        prediction_count: rows,
        predictions: rows_out,
        columns,
    })
}

/// JSON values of one column; numbers stay numbers, nulls become `null`
fn column_values(column: &Column) -> Result<Vec<Value>> {
    let values = match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
            .collect(),
        DataType::Boolean => column
            .bool()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Bool))
            .collect(),
        _ => column
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::from))
            .collect(),
    };
    Ok(values)
}

pub fn evaluate(record: &TrainedModelRecord, df: &DataFrame) -> Result<EvaluationReport> {
    let x = feature_matrix(record, df)?;
    require_columns(df, &record.target_columns, "target")?;

    let mut evaluation = BTreeMap::new();
    for (target, preds) in predict_targets(record, &x)? {
        let y_true = columns_to_array2(df, std::slice::from_ref(&target))?.column(0).to_owned();
        let metrics = RegressionMetrics::compute(&y_true, &preds)
            .map_err(|e| WorkbenchError::EvaluationFailure(format!("target '{}': {}", target, e)))?;
        evaluation.insert(target, metrics);
    }

    info!(model_id = %record.model_id, targets = evaluation.len(), "Model evaluated");

    Ok(EvaluationReport {
        evaluation,
        model_info: ModelInfoSummary {
            model_type: record.model_type.clone(),
            model_name: record.model_name.clone(),
            training_time: record.training_time,
            feature_count: record.feature_columns.len(),
            target_count: record.target_columns.len(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkbenchConfig;
    use crate::trainer::{train_model, TrainParams};

    fn trained() -> TrainedModelRecord {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let df = df!("x" => &x, "y" => &y).unwrap();
        let params = TrainParams {
            model_type: "LinearRegression".into(),
            target_columns: vec!["y".into()],
            ..Default::default()
        };
        train_model(&df, &params, &WorkbenchConfig::default()).unwrap().record
    }

    #[test]
    fn test_predict_with_features() {
        let record = trained();
        let df = df!("label" => &["a", "b"], "x" => &[100.0, 200.0]).unwrap();
        let report = predict(&record, &df, true).unwrap();
        assert_eq!(report.columns, vec!["label", "x", "y_predicted"]);
        assert_eq!(report.shape, (2, 3));
        assert_eq!(report.prediction_count, 2);
        assert_eq!(report.predictions[1]["label"], Value::from("b"));
        let pred = report.predictions[0]["y_predicted"].as_f64().unwrap();
        assert!((pred - 201.0).abs() < 1e-6, "pred = {}", pred);
    }

    #[test]
    fn test_missing_feature_is_evaluation_failure() {
        let record = trained();
        let df = df!("z" => &[1.0]).unwrap();
        let err = predict(&record, &df, false).unwrap_err();
        assert!(matches!(err, WorkbenchError::EvaluationFailure(_)));

        let df = df!("x" => &[1.0]).unwrap();
        let err = evaluate(&record, &df).unwrap_err();
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn test_evaluate_reports_model_info() {
        let record = trained();
        let df = df!("y" => &[3.0, 5.0], "x" => &[1.0, 2.0]).unwrap();
        let report = evaluate(&record, &df).unwrap();
        assert!(report.evaluation["y"].mse < 1e-10);
        assert_eq!(report.model_info.feature_count, 1);
        assert_eq!(report.model_info.model_type, "LinearRegression");
    }
}
