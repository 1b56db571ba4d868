//! Ordinary least squares regression

use crate::error::{Result, WorkbenchError};
use crate::params::{ParamMap, ParamReader};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve the symmetric positive-definite system `a x = b` by Cholesky
/// factorization. A tiny ridge is added once if `a` is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;

    'attempt: for jitter in [0.0, ridge.max(1e-12)] {
        let mut l = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
                if i == j {
                    let diag = a[[i, i]] + jitter - sum;
                    if diag <= 1e-12 * a[[i, i]].abs() || diag <= 0.0 {
                        continue 'attempt;
                    }
                    l[[i, j]] = diag.sqrt();
                } else {
                    l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
                }
            }
        }

        // L y = b, then L^T x = y
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
            y[i] = (b[i] - sum) / l[[i, i]];
        }
        let mut x = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
            x[i] = (y[i] - sum) / l[[i, i]];
        }
        return Some(x);
    }
    None
}

/// Gauss-Jordan elimination with partial pivoting
fn gauss_jordan_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    aug.slice_mut(ndarray::s![.., ..n]).assign(a);
    aug.column_mut(n).assign(b);

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            aug[[r1, col]]
                .abs()
                .partial_cmp(&aug[[r2, col]].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if aug[[pivot_row, col]].abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }
        let pivot = aug[[col, col]];
        aug.row_mut(col).mapv_inplace(|v| v / pivot);
        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                if factor != 0.0 {
                    let pivot_vals = aug.row(col).to_owned();
                    aug.row_mut(row).scaled_add(-factor, &pivot_vals);
                }
            }
        }
    }
    Some(aug.column(n).to_owned())
}

/// Linear regression (`LinearRegression` in the registry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    pub fit_intercept: bool,
    /// Constrain coefficients to be non-negative
    pub positive: bool,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            fit_intercept: true,
            positive: false,
            coefficients: None,
            intercept: 0.0,
        }
    }

    /// Accepts `fit_intercept`, `positive`, `copy_X` and `n_jobs`; the last
    /// two only shape the caller's memory and threading expectations.
    pub fn from_params(params: &ParamMap) -> Result<Self> {
        let r = ParamReader::new(params);
        r.bool_or("copy_X", true)?;
        r.n_jobs()?;
        Ok(Self::new()
            .with_fit_intercept(r.bool_or("fit_intercept", true)?)
            .with_positive(r.bool_or("positive", false)?))
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn with_positive(mut self, positive: bool) -> Self {
        self.positive = positive;
        self
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(WorkbenchError::MissingTrainingData(
                "cannot fit on zero rows".to_string(),
            ));
        }

        let (x_mean, y_mean) = if self.fit_intercept {
            let x_mean = x
                .mean_axis(Axis(0))
                .ok_or_else(|| WorkbenchError::ComputationError("empty design matrix".into()))?;
            (x_mean, y.sum() / n_samples as f64)
        } else {
            (Array1::zeros(x.ncols()), 0.0)
        };
        let xc = x - &x_mean.view().insert_axis(Axis(0));
        let yc = y - y_mean;

        let coefficients = if self.positive {
            nonnegative_least_squares(&xc, &yc, 1000, 1e-10)
        } else {
            let xtx = xc.t().dot(&xc);
            let xty = xc.t().dot(&yc);
            cholesky_solve(&xtx, &xty)
                .or_else(|| gauss_jordan_solve(&xtx, &xty))
                .ok_or_else(|| {
                    WorkbenchError::ComputationError(
                        "normal equations are singular".to_string(),
                    )
                })?
        };

        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(WorkbenchError::ComputationError(
                "least squares produced non-finite coefficients".to_string(),
            ));
        }

        self.intercept = if self.fit_intercept {
            y_mean - coefficients.dot(&x_mean)
        } else {
            0.0
        };
        self.coefficients = Some(coefficients);
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(WorkbenchError::ModelNotFitted)?;
        if x.ncols() != coefficients.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", coefficients.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.dot(coefficients) + self.intercept)
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

/// Projected coordinate descent for `min ||X w - y||^2, w >= 0`.
fn nonnegative_least_squares(x: &Array2<f64>, y: &Array1<f64>, max_iter: usize, tol: f64) -> Array1<f64> {
    let n_features = x.ncols();
    let col_sq: Vec<f64> = x.axis_iter(Axis(1)).map(|c| c.dot(&c)).collect();
    let mut w = Array1::<f64>::zeros(n_features);
    let mut residual = y.clone();

    for _ in 0..max_iter {
        let mut max_step = 0.0f64;
        for j in 0..n_features {
            if col_sq[j] <= 0.0 {
                continue;
            }
            let col = x.column(j);
            let rho = col.dot(&residual) + col_sq[j] * w[j];
            let updated = (rho / col_sq[j]).max(0.0);
            let step = updated - w[j];
            if step != 0.0 {
                residual.scaled_add(-step, &col);
                w[j] = updated;
                max_step = max_step.max(step.abs());
            }
        }
        if max_step < tol {
            break;
        }
    }
    w
}
