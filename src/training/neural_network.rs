//! Multi-layer perceptron regressor
//!
//! Inputs and target are standardized internally, so raw feature scales do not
//! destabilize training. Optimized with mini-batch Adam or momentum SGD.

use crate::error::{Result, WorkbenchError};
use crate::params::{ParamMap, ParamReader};
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Hidden-layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    ReLU,
    Tanh,
    Logistic,
    Identity,
}

impl Activation {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "relu" => Ok(Activation::ReLU),
            "tanh" => Ok(Activation::Tanh),
            "logistic" => Ok(Activation::Logistic),
            "identity" => Ok(Activation::Identity),
            other => Err(WorkbenchError::invalid_param(
                "activation",
                other,
                "expected relu, tanh, logistic or identity",
            )),
        }
    }

    fn apply(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| v.max(0.0)),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Logistic => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Identity => z.clone(),
        }
    }

    /// Derivative expressed through the activation output `a`
    fn derivative(&self, a: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => a.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Tanh => a.mapv(|v| 1.0 - v * v),
            Activation::Logistic => a.mapv(|v| v * (1.0 - v)),
            Activation::Identity => Array2::ones(a.raw_dim()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Solver {
    Adam,
    Sgd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningRateSchedule {
    Constant,
    /// Divide the rate by 5 whenever training loss stalls
    Adaptive,
}

/// Neural network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPConfig {
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
    pub solver: Solver,
    pub learning_rate: LearningRateSchedule,
    pub learning_rate_init: f64,
    /// Maximum epochs
    pub max_iter: usize,
    pub batch_size: Option<usize>,
    /// L2 penalty
    pub alpha: f64,
    pub momentum: f64,
    pub tol: f64,
    pub early_stopping: bool,
    pub validation_fraction: f64,
    pub n_iter_no_change: usize,
    pub random_state: Option<u64>,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100],
            activation: Activation::ReLU,
            solver: Solver::Adam,
            learning_rate: LearningRateSchedule::Constant,
            learning_rate_init: 0.001,
            max_iter: 200,
            batch_size: None,
            alpha: 0.0001,
            momentum: 0.9,
            tol: 1e-4,
            early_stopping: false,
            validation_fraction: 0.1,
            n_iter_no_change: 10,
            random_state: None,
        }
    }
}

impl MLPConfig {
    pub fn from_params(params: &ParamMap) -> Result<Self> {
        let r = ParamReader::new(params);
        let d = Self::default();
        let solver = match r.str_or("solver", "adam")? {
            "adam" => Solver::Adam,
            "sgd" => Solver::Sgd,
            other => return Err(WorkbenchError::invalid_param("solver", other, "expected adam or sgd")),
        };
        let learning_rate = match r.str_or("learning_rate", "constant")? {
            "constant" | "invscaling" => LearningRateSchedule::Constant,
            "adaptive" => LearningRateSchedule::Adaptive,
            other => {
                return Err(WorkbenchError::invalid_param(
                    "learning_rate",
                    other,
                    "expected constant or adaptive",
                ))
            }
        };
        let batch_size = match params.get("batch_size").and_then(|v| v.as_str()) {
            Some("auto") => None,
            _ => r.optional_usize("batch_size", None)?,
        };
        let validation_fraction = r.f64_or("validation_fraction", d.validation_fraction)?;
        if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
            return Err(WorkbenchError::invalid_param(
                "validation_fraction",
                validation_fraction,
                "must be in (0, 1)",
            ));
        }
        Ok(Self {
            hidden_layers: r.layers_or("hidden_layer_sizes", &d.hidden_layers)?,
            activation: Activation::parse(r.str_or("activation", "relu")?)?,
            solver,
            learning_rate,
            learning_rate_init: r.positive_f64_or("learning_rate_init", d.learning_rate_init)?,
            max_iter: r.usize_or("max_iter", d.max_iter)?,
            batch_size,
            alpha: r.f64_or("alpha", d.alpha)?,
            momentum: r.f64_or("momentum", d.momentum)?,
            tol: r.f64_or("tol", d.tol)?,
            early_stopping: r.bool_or("early_stopping", d.early_stopping)?,
            validation_fraction,
            n_iter_no_change: r.usize_or("n_iter_no_change", d.n_iter_no_change)?.max(1),
            random_state: r.seed("random_state")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Standardizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    fn fit(x: &Array2<f64>) -> Self {
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });
        Self { mean, scale }
    }

    fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean.view().insert_axis(Axis(0))) / &self.scale.view().insert_axis(Axis(0))
    }
}

/// Glorot-uniform weight matrix
fn uniform_init(fan_in: usize, fan_out: usize, bound: f64, rng: &mut Xoshiro256PlusPlus) -> Array2<f64> {
    Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-bound..bound))
}

/// Per-parameter optimizer state
struct OptimizerState {
    m_w: Vec<Array2<f64>>,
    m_b: Vec<Array1<f64>>,
    v_w: Vec<Array2<f64>>,
    v_b: Vec<Array1<f64>>,
    t: i32,
}

/// Multi-Layer Perceptron Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPRegressor {
    config: MLPConfig,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    x_scaler: Option<Standardizer>,
    y_mean: f64,
    y_scale: f64,
    n_iter: usize,
}

impl MLPRegressor {
    pub fn new(config: MLPConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            biases: Vec::new(),
            x_scaler: None,
            y_mean: 0.0,
            y_scale: 1.0,
            n_iter: 0,
        }
    }

    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    /// Epochs actually run by the last fit
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples < 2 {
            return Err(WorkbenchError::MissingTrainingData(
                "an MLP needs at least two rows".to_string(),
            ));
        }

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let scaler = Standardizer::fit(x);
        let xs = scaler.transform(x);
        self.y_mean = y.sum() / n_samples as f64;
        let y_std = y.std(0.0);
        self.y_scale = if y_std > 1e-12 { y_std } else { 1.0 };
        let ys = y.mapv(|v| (v - self.y_mean) / self.y_scale);
        self.x_scaler = Some(scaler);

        let mut order: Vec<usize> = (0..n_samples).collect();
        order.shuffle(&mut rng);
        let n_val = if self.config.early_stopping {
            ((n_samples as f64) * self.config.validation_fraction).ceil() as usize
        } else {
            0
        };
        let n_val = n_val.min(n_samples - 1);
        let (val_rows, train_rows) = order.split_at(n_val);
        let mut train_rows = train_rows.to_vec();
        let x_val = xs.select(Axis(0), val_rows);
        let y_val = ys.select(Axis(0), val_rows);

        self.initialize_weights(x.ncols(), &mut rng);
        let mut state = OptimizerState {
            m_w: self.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect(),
            m_b: self.biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect(),
            v_w: self.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect(),
            v_b: self.biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect(),
            t: 0,
        };

        let batch_size = self
            .config
            .batch_size
            .unwrap_or(200)
            .clamp(1, train_rows.len());
        let mut lr = self.config.learning_rate_init;
        let mut best_loss = f64::INFINITY;
        let mut best_params: Option<(Vec<Array2<f64>>, Vec<Array1<f64>>)> = None;
        let mut stall = 0usize;
        self.n_iter = 0;

        for _epoch in 0..self.config.max_iter {
            train_rows.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for batch in train_rows.chunks(batch_size) {
                let xb = xs.select(Axis(0), batch);
                let yb = ys.select(Axis(0), batch);
                epoch_loss += self.train_batch(&xb, &yb, lr, &mut state) * batch.len() as f64;
            }
            epoch_loss /= train_rows.len() as f64;
            self.n_iter += 1;

            if !epoch_loss.is_finite() {
                return Err(WorkbenchError::ComputationError(
                    "MLP training diverged".to_string(),
                ));
            }

            let monitored = if self.config.early_stopping {
                let preds = self.forward(&x_val).pop().unwrap_or_else(|| Array2::zeros((0, 1)));
                (&preds.column(0) - &y_val).mapv(|e| e * e).mean().unwrap_or(f64::INFINITY)
            } else {
                epoch_loss
            };

            if monitored < best_loss - self.config.tol {
                best_loss = monitored;
                stall = 0;
                if self.config.early_stopping {
                    best_params = Some((self.weights.clone(), self.biases.clone()));
                }
            } else {
                stall += 1;
            }

            if stall >= self.config.n_iter_no_change {
                if !self.config.early_stopping
                    && self.config.learning_rate == LearningRateSchedule::Adaptive
                    && lr > 1e-6
                {
                    lr /= 5.0;
                    stall = 0;
                    continue;
                }
                break;
            }
        }

        if let Some((weights, biases)) = best_params {
            self.weights = weights;
            self.biases = biases;
        }
        Ok(())
    }

    fn initialize_weights(&mut self, n_inputs: usize, rng: &mut Xoshiro256PlusPlus) {
        let mut sizes = vec![n_inputs];
        sizes.extend(self.config.hidden_layers.iter().copied());
        sizes.push(1);

        self.weights.clear();
        self.biases.clear();
        for pair in sizes.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
            self.weights.push(uniform_init(fan_in, fan_out, bound, rng));
            self.biases.push(Array1::from_shape_fn(fan_out, |_| rng.gen_range(-bound..bound)));
        }
    }

    /// Activations for every layer, input first
    fn forward(&self, x: &Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = vec![x.clone()];
        let last = self.weights.len().saturating_sub(1);
        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            let prev = activations.last().unwrap_or(x);
            let z = prev.dot(w) + &b.view().insert_axis(Axis(0));
            let a = if i == last { z } else { self.config.activation.apply(&z) };
            activations.push(a);
        }
        activations
    }

    /// One optimizer step on a batch; returns the batch loss (half MSE)
    fn train_batch(&mut self, xb: &Array2<f64>, yb: &Array1<f64>, lr: f64, state: &mut OptimizerState) -> f64 {
        let m = xb.nrows() as f64;
        let activations = self.forward(xb);
        let output = &activations[activations.len() - 1];
        let mut delta = output - &yb.view().insert_axis(Axis(1));
        let loss = delta.mapv(|e| e * e).sum() / (2.0 * m);

        state.t += 1;
        let (beta1, beta2, eps) = (0.9, 0.999, 1e-8);
        for layer in (0..self.weights.len()).rev() {
            let grad_w = activations[layer].t().dot(&delta) / m + &self.weights[layer] * (self.config.alpha / m);
            let grad_b = delta.sum_axis(Axis(0)) / m;
            if layer > 0 {
                delta = delta.dot(&self.weights[layer].t()) * self.config.activation.derivative(&activations[layer]);
            }

            match self.config.solver {
                Solver::Adam => {
                    state.m_w[layer] = &state.m_w[layer] * beta1 + &grad_w * (1.0 - beta1);
                    state.v_w[layer] = &state.v_w[layer] * beta2 + grad_w.mapv(|g| g * g) * (1.0 - beta2);
                    state.m_b[layer] = &state.m_b[layer] * beta1 + &grad_b * (1.0 - beta1);
                    state.v_b[layer] = &state.v_b[layer] * beta2 + grad_b.mapv(|g| g * g) * (1.0 - beta2);
                    let step = lr * (1.0 - beta2.powi(state.t)).sqrt() / (1.0 - beta1.powi(state.t));
                    let upd_w = &state.m_w[layer] / &state.v_w[layer].mapv(|v| v.sqrt() + eps);
                    let upd_b = &state.m_b[layer] / &state.v_b[layer].mapv(|v| v.sqrt() + eps);
                    self.weights[layer].scaled_add(-step, &upd_w);
                    self.biases[layer].scaled_add(-step, &upd_b);
                }
                Solver::Sgd => {
                    let mu = self.config.momentum;
                    state.m_w[layer] = &state.m_w[layer] * mu - &grad_w * lr;
                    state.m_b[layer] = &state.m_b[layer] * mu - &grad_b * lr;
                    self.weights[layer] += &state.m_w[layer];
                    self.biases[layer] += &state.m_b[layer];
                }
            }
        }
        loss
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scaler = self.x_scaler.as_ref().ok_or(WorkbenchError::ModelNotFitted)?;
        if x.ncols() != scaler.mean.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", scaler.mean.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let out = self
            .forward(&scaler.transform(x))
            .pop()
            .ok_or(WorkbenchError::ModelNotFitted)?;
        Ok(out.column(0).mapv(|v| v * self.y_scale + self.y_mean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((200, 2), |(i, j)| ((i * (j + 1)) % 50) as f64 * 10.0);
        let y = x.column(0).mapv(|v| 0.3 * v) + x.column(1).mapv(|v| 0.1 * v) + 500.0;
        (x, y)
    }

    #[test]
    fn test_mlp_learns_linear_signal_on_raw_scale() {
        let (x, y) = data();
        let mut model = MLPRegressor::new(MLPConfig {
            hidden_layers: vec![16],
            max_iter: 300,
            learning_rate_init: 0.01,
            random_state: Some(42),
            ..Default::default()
        });
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        let mse = (&preds - &y).mapv(|e| e * e).mean().unwrap();
        assert!(mse < 0.05 * y.var(0.0), "mse {} vs var {}", mse, y.var(0.0));
    }

    #[test]
    fn test_early_stopping_halts() {
        let (x, y) = data();
        let mut model = MLPRegressor::new(MLPConfig {
            hidden_layers: vec![8],
            max_iter: 500,
            early_stopping: true,
            n_iter_no_change: 3,
            tol: 1e-1,
            random_state: Some(1),
            ..Default::default()
        });
        model.fit(&x, &y).unwrap();
        assert!(model.n_iter() < 500);
        assert!(model.predict(&x).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let (x, y) = data();
        let config = MLPConfig {
            hidden_layers: vec![4],
            max_iter: 20,
            random_state: Some(3),
            ..Default::default()
        };
        let mut a = MLPRegressor::new(config.clone());
        let mut b = MLPRegressor::new(config);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_params_parse_layers_and_schedule() {
        let params: ParamMap = serde_json::from_str(
            r#"{"hidden_layer_sizes": [50, 50], "activation": "tanh", "learning_rate": "adaptive"}"#,
        )
        .unwrap();
        let config = MLPConfig::from_params(&params).unwrap();
        assert_eq!(config.hidden_layers, vec![50, 50]);
        assert_eq!(config.activation, Activation::Tanh);
        assert_eq!(config.learning_rate, LearningRateSchedule::Adaptive);
    }
}
