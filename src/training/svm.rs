//! Epsilon-insensitive support vector regression
//!
//! Solved in the dual by coordinate descent. The bias is absorbed into the
//! kernel (`K + 1`), which removes the equality constraint and lets every
//! coordinate update be a clipped soft-threshold.

use crate::error::{Result, WorkbenchError};
use crate::params::{ParamMap, ParamReader, ParamValue};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray::parallel::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: usize = 1024 * 1024;
const DEFAULT_MAX_EPOCHS: usize = 1000;

/// Kernel function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KernelType {
    Linear,
    Polynomial { degree: u32, coef0: f64 },
    Rbf,
    Sigmoid { coef0: f64 },
}

/// Kernel coefficient for rbf/poly/sigmoid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * X.var())`
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVRConfig {
    pub c: f64,
    pub epsilon: f64,
    pub kernel: KernelType,
    pub gamma: Gamma,
    pub tol: f64,
    pub max_epochs: usize,
    /// Megabytes allowed for the precomputed kernel matrix; larger problems
    /// compute kernel columns on demand
    pub cache_size: f64,
}

impl Default for SVRConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.1,
            kernel: KernelType::Rbf,
            gamma: Gamma::Scale,
            tol: 1e-3,
            max_epochs: DEFAULT_MAX_EPOCHS,
            cache_size: 200.0,
        }
    }
}

impl SVRConfig {
    pub fn from_params(params: &ParamMap) -> Result<Self> {
        let r = ParamReader::new(params);
        let d = Self::default();

        let degree = r.usize_or("degree", 3)? as u32;
        let coef0 = r.f64_or("coef0", 0.0)?;
        let kernel = match r.str_or("kernel", "rbf")? {
            "rbf" => KernelType::Rbf,
            "linear" => KernelType::Linear,
            "poly" => KernelType::Polynomial { degree, coef0 },
            "sigmoid" => KernelType::Sigmoid { coef0 },
            other => {
                return Err(WorkbenchError::invalid_param(
                    "kernel",
                    other,
                    "expected rbf, linear, poly or sigmoid",
                ))
            }
        };
        let gamma = match params.get("gamma") {
            None => Gamma::Scale,
            Some(ParamValue::Str(s)) if s == "scale" => Gamma::Scale,
            Some(ParamValue::Str(s)) if s == "auto" => Gamma::Auto,
            Some(v) => match v.as_f64() {
                Some(g) if g > 0.0 => Gamma::Value(g),
                _ => {
                    return Err(WorkbenchError::invalid_param(
                        "gamma",
                        v,
                        "expected scale, auto or a positive number",
                    ))
                }
            },
        };
        let max_epochs = match params.get("max_iter").and_then(ParamValue::as_i64) {
            Some(-1) | None => d.max_epochs,
            Some(n) if n > 0 => n as usize,
            Some(n) => return Err(WorkbenchError::invalid_param("max_iter", n, "expected -1 or a positive count")),
        };

        Ok(Self {
            c: r.positive_f64_or("C", d.c)?,
            epsilon: r.f64_or("epsilon", d.epsilon)?.max(0.0),
            kernel,
            gamma,
            tol: r.positive_f64_or("tol", d.tol)?,
            max_epochs,
            cache_size: r.positive_f64_or("cache_size", d.cache_size)?,
        })
    }
}

/// Support Vector Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMRegressor {
    config: SVRConfig,
    support_vectors: Option<Array2<f64>>,
    dual_coef: Array1<f64>,
    gamma_value: f64,
    n_features: usize,
}

impl SVMRegressor {
    pub fn new(config: SVRConfig) -> Self {
        Self {
            config,
            support_vectors: None,
            dual_coef: Array1::zeros(0),
            gamma_value: 1.0,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &SVRConfig {
        &self.config
    }

    fn kernel(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let g = self.gamma_value;
        match self.config.kernel {
            KernelType::Linear => a.dot(&b),
            KernelType::Polynomial { degree, coef0 } => (g * a.dot(&b) + coef0).powi(degree as i32),
            KernelType::Rbf => {
                let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                (-g * sq).exp()
            }
            KernelType::Sigmoid { coef0 } => (g * a.dot(&b) + coef0).tanh(),
        }
    }

    fn resolve_gamma(&self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match self.config.gamma {
            Gamma::Value(g) => g,
            Gamma::Auto => 1.0 / n_features,
            Gamma::Scale => {
                let var = x.var(0.0);
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
        }
    }

    /// Column `i` of the bias-augmented kernel matrix
    fn q_column(&self, x: &Array2<f64>, i: usize) -> Array1<f64> {
        let xi = x.row(i);
        x.axis_iter(Axis(0))
            .into_par_iter()
            .map(|xj| self.kernel(xi, xj) + 1.0)
            .collect::<Vec<f64>>()
            .into()
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", n),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n == 0 {
            return Err(WorkbenchError::MissingTrainingData(
                "cannot fit SVR on zero rows".to_string(),
            ));
        }
        self.n_features = x.ncols();
        self.gamma_value = self.resolve_gamma(x);

        let fits_cache = (n * n * std::mem::size_of::<f64>()) as f64
            <= self.config.cache_size * BYTES_PER_MB as f64;
        let q_matrix: Option<Array2<f64>> = if fits_cache {
            let cols: Vec<Array1<f64>> = (0..n).into_par_iter().map(|i| self.q_column(x, i)).collect();
            let mut q = Array2::<f64>::zeros((n, n));
            for (i, col) in cols.into_iter().enumerate() {
                q.column_mut(i).assign(&col);
            }
            Some(q)
        } else {
            tracing::debug!(rows = n, cache_mb = self.config.cache_size, "kernel matrix exceeds cache, computing columns on demand");
            None
        };
        let q_diag: Vec<f64> = (0..n).map(|i| self.kernel(x.row(i), x.row(i)) + 1.0).collect();

        let c = self.config.c;
        let eps = self.config.epsilon;
        let mut beta = Array1::<f64>::zeros(n);
        // f = Q beta
        let mut f = Array1::<f64>::zeros(n);

        let mut converged = false;
        for _ in 0..self.config.max_epochs {
            let mut max_change = 0.0f64;
            for i in 0..n {
                let qii = q_diag[i];
                if qii <= 0.0 {
                    continue;
                }
                let g = f[i] - y[i];
                let z = beta[i] - g / qii;
                let shrink = eps / qii;
                let proposed = if z > shrink {
                    z - shrink
                } else if z < -shrink {
                    z + shrink
                } else {
                    0.0
                };
                let updated = proposed.clamp(-c, c);
                let delta = updated - beta[i];
                if delta == 0.0 {
                    continue;
                }
                match &q_matrix {
                    Some(q) => f.scaled_add(delta, &q.column(i)),
                    None => f.scaled_add(delta, &self.q_column(x, i)),
                }
                beta[i] = updated;
                max_change = max_change.max(delta.abs() * qii);
            }
            if max_change < self.config.tol {
                converged = true;
                break;
            }
        }
        if !converged {
            tracing::warn!(epochs = self.config.max_epochs, "SVR stopped before reaching tolerance");
        }
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(WorkbenchError::ComputationError("SVR dual diverged".to_string()));
        }

        let support: Vec<usize> = (0..n).filter(|&i| beta[i] != 0.0).collect();
        self.dual_coef = support.iter().map(|&i| beta[i]).collect();
        self.support_vectors = Some(x.select(Axis(0), &support));
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let sv = self.support_vectors.as_ref().ok_or(WorkbenchError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let preds: Vec<f64> = x
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| {
                sv.axis_iter(Axis(0))
                    .zip(self.dual_coef.iter())
                    .map(|(s, &b)| b * (self.kernel(s, row) + 1.0))
                    .sum()
            })
            .collect();
        Ok(Array1::from_vec(preds))
    }

    pub fn n_support_vectors(&self) -> usize {
        self.dual_coef.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_kernel_recovers_line() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64 / 10.0);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        let mut svr = SVMRegressor::new(SVRConfig {
            kernel: KernelType::Linear,
            c: 100.0,
            epsilon: 0.01,
            tol: 1e-6,
            max_epochs: 5000,
            ..Default::default()
        });
        svr.fit(&x, &y).unwrap();
        let preds = svr.predict(&array![[1.0], [2.0]]).unwrap();
        assert!((preds[0] - 3.0).abs() < 0.1, "pred {}", preds[0]);
        assert!((preds[1] - 5.0).abs() < 0.1, "pred {}", preds[1]);
    }

    #[test]
    fn test_rbf_tracks_curve() {
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64 / 10.0);
        let y = x.column(0).mapv(f64::sin);
        let mut svr = SVMRegressor::new(SVRConfig { c: 10.0, ..Default::default() });
        svr.fit(&x, &y).unwrap();
        let preds = svr.predict(&x).unwrap();
        let mse = (&preds - &y).mapv(|e| e * e).mean().unwrap();
        assert!(mse < 0.05, "mse {}", mse);
    }

    #[test]
    fn test_on_demand_columns_match_cached() {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| ((i + 3 * j) % 7) as f64);
        let y = x.column(0).to_owned() - x.column(1).mapv(|v| 0.5 * v);
        let mut cached = SVMRegressor::new(SVRConfig::default());
        let mut uncached = SVMRegressor::new(SVRConfig { cache_size: 1e-6, ..Default::default() });
        cached.fit(&x, &y).unwrap();
        uncached.fit(&x, &y).unwrap();
        let a = cached.predict(&x).unwrap();
        let b = uncached.predict(&x).unwrap();
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p - q).abs() < 1e-9);
        }
    }

    #[test]
    fn test_gamma_params() {
        let mut params = ParamMap::new();
        params.insert("gamma".into(), "auto".into());
        params.insert("kernel".into(), "poly".into());
        let config = SVRConfig::from_params(&params).unwrap();
        assert_eq!(config.gamma, Gamma::Auto);
        assert_eq!(config.kernel, KernelType::Polynomial { degree: 3, coef0: 0.0 });

        params.insert("gamma".into(), (-1.0).into());
        assert!(SVRConfig::from_params(&params).is_err());
    }
}
