//! Ensemble methods
//!
//! Stacking (meta-learning over out-of-fold base predictions).

mod stacking;

pub use stacking::{StackingConfig, StackingRegressor};
