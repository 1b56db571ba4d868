//! Model training module
//!
//! Regressor-only estimators behind one [`Regressor`] enum:
//! - Linear regression (normal equations, optional non-negative coefficients)
//! - Decision trees and Random Forests
//! - Gradient boosting and XGBoost-style second-order boosting
//! - Support vector regression
//! - Neural networks (MLP)
//!
//! plus k-fold cross-validation and grid/randomized hyperparameter search.

mod models;
pub mod cross_validation;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod linear_models;
pub mod neural_network;
pub mod random_forest;
pub mod search;
pub mod svm;
pub mod xgboost;

pub use cross_validation::{cross_val_predict, cross_val_score, CVResults, CVSplit, KFold};
pub use decision_tree::{DecisionTreeRegressor, TreeNode};
pub use gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
pub use linear_models::LinearRegression;
pub use models::Regressor;
pub use neural_network::{Activation, MLPConfig, MLPRegressor};
pub use random_forest::{MaxFeatures, RandomForestConfig, RandomForestRegressor};
pub use search::{search, SearchConfig, SearchMethod, SearchOutcome};
pub use svm::{Gamma, KernelType, SVMRegressor, SVRConfig};
pub use xgboost::{TreeMethod, XGBoostConfig, XGBoostRegressor};
