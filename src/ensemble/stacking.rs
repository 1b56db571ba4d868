//! Stacking ensemble method

use crate::error::{Result, WorkbenchError};
use crate::training::cross_validation::{cross_val_predict, KFold};
use crate::training::Regressor;
use ndarray::{concatenate, Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for stacking ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingConfig {
    /// Folds used to produce out-of-fold meta features
    pub n_folds: usize,
    /// Whether to include original features in meta-learner input
    pub passthrough: bool,
    /// Fold shuffling seed
    pub seed: Option<u64>,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            passthrough: false,
            seed: None,
        }
    }
}

/// Two-layer regressor: named base learners feed a meta learner.
///
/// The meta learner trains on out-of-fold base predictions; the base learners
/// are then refit on the full data for prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingRegressor {
    config: StackingConfig,
    base_learners: Vec<(String, Regressor)>,
    meta_learner: Regressor,
    fitted: bool,
}

impl StackingRegressor {
    pub fn new(config: StackingConfig, base_learners: Vec<(String, Regressor)>, meta_learner: Regressor) -> Self {
        Self {
            config,
            base_learners,
            meta_learner,
            fitted: false,
        }
    }

    pub fn config(&self) -> &StackingConfig {
        &self.config
    }

    pub fn base_names(&self) -> Vec<&str> {
        self.base_learners.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn base_learners(&self) -> &[(String, Regressor)] {
        &self.base_learners
    }

    pub fn meta_learner(&self) -> &Regressor {
        &self.meta_learner
    }

    pub fn unfitted(&self) -> StackingRegressor {
        StackingRegressor::new(
            self.config.clone(),
            self.base_learners
                .iter()
                .map(|(name, model)| (name.clone(), model.unfitted()))
                .collect(),
            self.meta_learner.unfitted(),
        )
    }

    fn with_passthrough(&self, meta_features: Array2<f64>, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.config.passthrough {
            Ok(concatenate(Axis(1), &[meta_features.view(), x.view()])?)
        } else {
            Ok(meta_features)
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if self.base_learners.is_empty() {
            return Err(WorkbenchError::TrainingError("No base models provided".to_string()));
        }

        let kfold = KFold::new(self.config.n_folds).shuffled(self.config.seed.unwrap_or(42));
        let splits = kfold.split(x.nrows())?;

        // Each base learner: out-of-fold column, then a full-data refit.
        let fitted: Vec<(Array1<f64>, Regressor)> = self
            .base_learners
            .par_iter()
            .map(|(_, learner)| -> Result<(Array1<f64>, Regressor)> {
                let oof = cross_val_predict(learner, x, y, &splits)?;
                let mut full = learner.unfitted();
                full.fit(x, y)?;
                Ok((oof, full))
            })
            .collect::<Result<_>>()?;

        let mut meta_features = Array2::zeros((x.nrows(), fitted.len()));
        for (col, (oof, _)) in fitted.iter().enumerate() {
            meta_features.column_mut(col).assign(oof);
        }
        let meta_features = self.with_passthrough(meta_features, x)?;

        let mut meta = self.meta_learner.unfitted();
        meta.fit(&meta_features, y)?;

        for ((_, slot), (_, model)) in self.base_learners.iter_mut().zip(fitted) {
            *slot = model;
        }
        self.meta_learner = meta;
        self.fitted = true;
        Ok(())
    }

    /// Per-base-learner predictions, one column per learner
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(WorkbenchError::ModelNotFitted);
        }
        let mut columns = Array2::zeros((x.nrows(), self.base_learners.len()));
        for (col, (_, learner)) in self.base_learners.iter().enumerate() {
            columns.column_mut(col).assign(&learner.predict(x)?);
        }
        Ok(columns)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let meta_features = self.with_passthrough(self.transform(x)?, x)?;
        self.meta_learner.predict(&meta_features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamMap;
    use crate::registry::ModelType;

    fn learner(model: ModelType, extra: &[(&str, i64)]) -> Regressor {
        let mut params = ParamMap::new();
        for (k, v) in extra {
            params.insert(k.to_string(), (*v).into());
        }
        Regressor::from_params(model, &params).unwrap()
    }

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| ((i * (j + 2)) % 23) as f64);
        let y = x.column(0).mapv(|v| 1.5 * v) - x.column(1).mapv(|v| 0.5 * v) + 4.0;
        (x, y)
    }

    #[test]
    fn test_stacking_fits_linear_signal() {
        let (x, y) = data();
        let mut stack = StackingRegressor::new(
            StackingConfig::default(),
            vec![
                ("lr".to_string(), learner(ModelType::LinearRegression, &[])),
                (
                    "rf".to_string(),
                    learner(ModelType::RandomForest, &[("n_estimators", 10), ("random_state", 42)]),
                ),
            ],
            learner(ModelType::LinearRegression, &[]),
        );
        stack.fit(&x, &y).unwrap();
        assert_eq!(stack.base_names(), vec!["lr", "rf"]);

        let preds = stack.predict(&x).unwrap();
        let mse = (&preds - &y).mapv(|e| e * e).mean().unwrap();
        assert!(mse < 1e-3, "mse {}", mse);
        assert_eq!(stack.transform(&x).unwrap().ncols(), 2);
    }

    #[test]
    fn test_passthrough_widens_meta_input() {
        let (x, y) = data();
        let mut stack = StackingRegressor::new(
            StackingConfig {
                passthrough: true,
                n_folds: 3,
                seed: Some(7),
            },
            vec![("lr".to_string(), learner(ModelType::LinearRegression, &[]))],
            learner(ModelType::LinearRegression, &[]),
        );
        stack.fit(&x, &y).unwrap();
        assert_eq!(stack.meta_learner().coefficients().unwrap().len(), 3);
        assert!(stack.predict(&x).is_ok());
    }

    #[test]
    fn test_unfitted_stack_refuses_to_predict() {
        let (x, _) = data();
        let stack = StackingRegressor::new(
            StackingConfig::default(),
            vec![("lr".to_string(), learner(ModelType::LinearRegression, &[]))],
            learner(ModelType::LinearRegression, &[]),
        );
        assert!(matches!(stack.predict(&x), Err(WorkbenchError::ModelNotFitted)));
    }
}
