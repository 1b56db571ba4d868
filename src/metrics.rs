//! Regression metrics

use crate::error::{Result, WorkbenchError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Error/quality metrics for one prediction vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    /// Compute `{mse, rmse, mae, r2}`.
    ///
    /// Fails on empty input, mismatched lengths, or non-finite values in
    /// either vector. A constant target yields `r2 = 1.0` for a perfect
    /// prediction and `0.0` otherwise.
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} predictions", y_true.len()),
                actual: format!("{} predictions", y_pred.len()),
            });
        }
        if y_true.is_empty() {
            return Err(WorkbenchError::MetricError(
                "cannot score an empty prediction vector".to_string(),
            ));
        }
        if let Some(pos) = y_true.iter().position(|v| !v.is_finite()) {
            return Err(WorkbenchError::MetricError(format!(
                "non-finite true value at row {}",
                pos
            )));
        }
        if let Some(pos) = y_pred.iter().position(|v| !v.is_finite()) {
            return Err(WorkbenchError::MetricError(format!(
                "non-finite prediction at row {}",
                pos
            )));
        }

        let n = y_true.len() as f64;
        let (ss_res, abs_sum) = y_true
            .iter()
            .zip(y_pred.iter())
            .fold((0.0, 0.0), |(sq, ab), (t, p)| {
                let e = t - p;
                (sq + e * e, ab + e.abs())
            });
        let mse = ss_res / n;

        let y_mean = y_true.sum() / n;
        let ss_tot: f64 = y_true.iter().map(|t| (t - y_mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        let metrics = Self {
            mse,
            rmse: mse.sqrt(),
            mae: abs_sum / n,
            r2,
        };
        if !(metrics.mse.is_finite() && metrics.r2.is_finite()) {
            return Err(WorkbenchError::MetricError(
                "metric overflowed to a non-finite value".to_string(),
            ));
        }
        Ok(metrics)
    }
}

pub fn mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    RegressionMetrics::compute(y_true, y_pred).map(|m| m.mse)
}

/// Mean and population standard deviation of fold scores
pub fn mean_std(scores: &[f64]) -> (f64, f64) {
    if scores.is_empty() {
        return (0.0, 0.0);
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_prediction() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let m = RegressionMetrics::compute(&y, &y).unwrap();
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.mae, 0.0);
        assert!((m.r2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_values() {
        let y_true = array![3.0, -0.5, 2.0, 7.0];
        let y_pred = array![2.5, 0.0, 2.0, 8.0];
        let m = RegressionMetrics::compute(&y_true, &y_pred).unwrap();
        assert!((m.mse - 0.375).abs() < 1e-12);
        assert!((m.rmse - 0.375f64.sqrt()).abs() < 1e-12);
        assert!((m.mae - 0.5).abs() < 1e-12);
        assert!((m.r2 - 0.948_608_137_044_967_9).abs() < 1e-9, "r2 = {}", m.r2);
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let result = RegressionMetrics::compute(&array![1.0, 2.0], &array![1.0]);
        assert!(matches!(result, Err(WorkbenchError::ShapeError { .. })));
    }

    #[test]
    fn test_rejects_non_finite() {
        let result = RegressionMetrics::compute(&array![1.0, 2.0], &array![1.0, f64::NAN]);
        assert!(matches!(result, Err(WorkbenchError::MetricError(_))));
        let result = RegressionMetrics::compute(&array![f64::INFINITY, 2.0], &array![1.0, 2.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_constant_target() {
        let y = array![5.0, 5.0, 5.0];
        assert_eq!(RegressionMetrics::compute(&y, &y).unwrap().r2, 1.0);
        let m = RegressionMetrics::compute(&y, &array![5.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.r2, 0.0);
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[1.0, 2.0, 3.0]);
        assert!((mean - 2.0).abs() < 1e-12);
        assert!((std - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
    }
}
