//! The closed set of estimators the workbench can train

use super::gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
use super::linear_models::LinearRegression;
use super::neural_network::{MLPConfig, MLPRegressor};
use super::random_forest::{RandomForestConfig, RandomForestRegressor};
use super::svm::{SVMRegressor, SVRConfig};
use super::xgboost::{XGBoostConfig, XGBoostRegressor};
use crate::ensemble::StackingRegressor;
use crate::error::{Result, WorkbenchError};
use crate::params::ParamMap;
use crate::registry::ModelType;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// A fittable regression estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Regressor {
    Linear(LinearRegression),
    RandomForest(RandomForestRegressor),
    GradientBoosting(GradientBoostingRegressor),
    XGBoost(XGBoostRegressor),
    SVR(SVMRegressor),
    MLP(MLPRegressor),
    Stacking(Box<StackingRegressor>),
}

impl Regressor {
    /// Construct an unfitted estimator. Callers validate keys first; a key of
    /// the wrong type here is an `InvalidParameter`.
    pub fn from_params(model: ModelType, params: &ParamMap) -> Result<Self> {
        Ok(match model {
            ModelType::LinearRegression => Regressor::Linear(LinearRegression::from_params(params)?),
            ModelType::RandomForest => {
                Regressor::RandomForest(RandomForestRegressor::new(RandomForestConfig::from_params(params)?))
            }
            ModelType::GradientBoosting => Regressor::GradientBoosting(GradientBoostingRegressor::new(
                GradientBoostingConfig::from_params(params)?,
            )),
            ModelType::XGBoost => Regressor::XGBoost(XGBoostRegressor::new(XGBoostConfig::from_params(params)?)),
            ModelType::SVR => Regressor::SVR(SVMRegressor::new(SVRConfig::from_params(params)?)),
            ModelType::MLP => Regressor::MLP(MLPRegressor::new(MLPConfig::from_params(params)?)),
        })
    }

    /// Registry family, `None` for a stacked ensemble
    pub fn model_type(&self) -> Option<ModelType> {
        match self {
            Regressor::Linear(_) => Some(ModelType::LinearRegression),
            Regressor::RandomForest(_) => Some(ModelType::RandomForest),
            Regressor::GradientBoosting(_) => Some(ModelType::GradientBoosting),
            Regressor::XGBoost(_) => Some(ModelType::XGBoost),
            Regressor::SVR(_) => Some(ModelType::SVR),
            Regressor::MLP(_) => Some(ModelType::MLP),
            Regressor::Stacking(_) => None,
        }
    }

    /// Same configuration, no fitted state
    pub fn unfitted(&self) -> Regressor {
        match self {
            Regressor::Linear(m) => Regressor::Linear(
                LinearRegression::new()
                    .with_fit_intercept(m.fit_intercept)
                    .with_positive(m.positive),
            ),
            Regressor::RandomForest(m) => Regressor::RandomForest(RandomForestRegressor::new(m.config().clone())),
            Regressor::GradientBoosting(m) => {
                Regressor::GradientBoosting(GradientBoostingRegressor::new(m.config().clone()))
            }
            Regressor::XGBoost(m) => Regressor::XGBoost(XGBoostRegressor::new(m.config().clone())),
            Regressor::SVR(m) => Regressor::SVR(SVMRegressor::new(m.config().clone())),
            Regressor::MLP(m) => Regressor::MLP(MLPRegressor::new(m.config().clone())),
            Regressor::Stacking(m) => Regressor::Stacking(Box::new(m.unfitted())),
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(WorkbenchError::MissingTrainingData(
                "cannot fit on an empty table".to_string(),
            ));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(WorkbenchError::DataError(
                "target contains non-finite values".to_string(),
            ));
        }
        match self {
            Regressor::Linear(m) => m.fit(x, y),
            Regressor::RandomForest(m) => m.fit(x, y),
            Regressor::GradientBoosting(m) => m.fit(x, y),
            Regressor::XGBoost(m) => m.fit(x, y),
            Regressor::SVR(m) => m.fit(x, y),
            Regressor::MLP(m) => m.fit(x, y),
            Regressor::Stacking(m) => m.fit(x, y),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let predictions = match self {
            Regressor::Linear(m) => m.predict(x),
            Regressor::RandomForest(m) => m.predict(x),
            Regressor::GradientBoosting(m) => m.predict(x),
            Regressor::XGBoost(m) => m.predict(x),
            Regressor::SVR(m) => m.predict(x),
            Regressor::MLP(m) => m.predict(x),
            Regressor::Stacking(m) => m.predict(x),
        }?;
        if predictions.iter().any(|v| !v.is_finite()) {
            return Err(WorkbenchError::ComputationError(
                "estimator produced non-finite predictions".to_string(),
            ));
        }
        Ok(predictions)
    }

    /// Importance per feature: impurity/gain for tree ensembles, absolute
    /// coefficients for linear models.
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        match self {
            Regressor::Linear(m) => m.coefficients().map(|c| c.mapv(f64::abs)),
            Regressor::RandomForest(m) => m.feature_importances().cloned(),
            Regressor::GradientBoosting(m) => m.feature_importances().cloned(),
            Regressor::XGBoost(m) => m.feature_importances().cloned(),
            Regressor::SVR(_) | Regressor::MLP(_) | Regressor::Stacking(_) => None,
        }
    }

    /// Raw coefficients of a linear model
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        match self {
            Regressor::Linear(m) => m.coefficients(),
            _ => None,
        }
    }
}
