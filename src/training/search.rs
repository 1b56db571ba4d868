//! Grid and randomized hyperparameter search scored by negative MSE

use super::cross_validation::{cross_val_score, KFold};
use super::models::Regressor;
use crate::error::{Result, WorkbenchError};
use crate::params::{expand_grid, ParamGrid, ParamMap};
use crate::registry::ModelType;
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Grid,
    Random,
}

impl FromStr for SearchMethod {
    type Err = WorkbenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grid" => Ok(SearchMethod::Grid),
            "random" => Ok(SearchMethod::Random),
            other => Err(WorkbenchError::invalid_param(
                "search_method",
                other,
                "expected grid or random",
            )),
        }
    }
}

/// Search settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub method: SearchMethod,
    pub cv_folds: usize,
    /// Candidates sampled by randomized search
    pub n_iter: usize,
    /// Concurrent candidate evaluations; `None` uses the global rayon pool
    pub n_jobs: Option<usize>,
    pub random_state: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            method: SearchMethod::Grid,
            cv_folds: 5,
            n_iter: 10,
            n_jobs: None,
            random_state: 42,
        }
    }
}

/// Winning candidate, refit on all the data the search saw
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best_params: ParamMap,
    /// Mean negative MSE across folds
    pub best_score: f64,
    pub best_estimator: Regressor,
    pub n_candidates: usize,
}

/// Candidate list for `grid`: every combination for grid search, a seeded
/// sample without replacement for randomized search.
pub fn candidates(grid: &ParamGrid, config: &SearchConfig) -> Vec<ParamMap> {
    let mut all = expand_grid(grid);
    if config.method == SearchMethod::Random && config.n_iter < all.len() {
        let mut rng = ChaCha8Rng::seed_from_u64(config.random_state);
        all.shuffle(&mut rng);
        all.truncate(config.n_iter.max(1));
    }
    all
}

/// Cross-validate every candidate and refit the best one on `(x, y)`.
///
/// A candidate that fails to construct or fit is skipped; the search fails
/// only when none succeeds. Ties keep the earliest candidate.
pub fn search(
    model: ModelType,
    grid: &ParamGrid,
    x: &Array2<f64>,
    y: &Array1<f64>,
    config: &SearchConfig,
) -> Result<SearchOutcome> {
    let candidates = candidates(grid, config);
    let kfold = KFold::new(config.cv_folds).shuffled(config.random_state);

    let evaluate = |params: &ParamMap| -> Result<f64> {
        let estimator = Regressor::from_params(model, params)?;
        let cv = cross_val_score(&estimator, x, y, &kfold)?;
        debug!(model = %model, params = ?params, score = cv.mean_score, "Evaluated candidate");
        Ok(cv.mean_score)
    };

    let scores: Vec<Result<f64>> = match config.n_jobs {
        Some(1) => candidates.iter().map(evaluate).collect(),
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()?
            .install(|| candidates.par_iter().map(evaluate).collect()),
        None => candidates.par_iter().map(evaluate).collect(),
    };

    let mut best: Option<(usize, f64)> = None;
    let mut last_error = None;
    for (idx, score) in scores.into_iter().enumerate() {
        match score {
            Ok(score) => {
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((idx, score));
                }
            }
            Err(e) => {
                warn!(model = %model, params = ?candidates[idx], error = %e, "Candidate failed");
                last_error = Some(e);
            }
        }
    }

    let (best_idx, best_score) = best.ok_or_else(|| {
        WorkbenchError::TrainingError(format!(
            "every {} candidate failed{}",
            model,
            last_error.map(|e| format!(": {}", e)).unwrap_or_default()
        ))
    })?;

    let best_params = candidates[best_idx].clone();
    let mut best_estimator = Regressor::from_params(model, &best_params)?;
    best_estimator.fit(x, y)?;

    Ok(SearchOutcome {
        best_params,
        best_score,
        best_estimator,
        n_candidates: candidates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{grid, ParamValue};

    #[test]
    fn test_random_candidates_are_seeded_subset() {
        let g = ModelType::RandomForest.default_grid();
        let config = SearchConfig {
            method: SearchMethod::Random,
            n_iter: 5,
            ..Default::default()
        };
        let a = candidates(&g, &config);
        let b = candidates(&g, &config);
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);

        let small = grid(&[("fit_intercept", vec![true.into(), false.into()])]);
        assert_eq!(candidates(&small, &config).len(), 2);
    }

    #[test]
    fn test_grid_search_prefers_intercept_on_offset_line() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| 2.0 * v + 10.0);
        let g = grid(&[("fit_intercept", vec![false.into(), true.into()])]);

        let outcome = search(ModelType::LinearRegression, &g, &x, &y, &SearchConfig::default()).unwrap();
        assert_eq!(outcome.best_params["fit_intercept"], ParamValue::Bool(true));
        assert_eq!(outcome.n_candidates, 2);
        assert!(outcome.best_score > -1e-10);
        assert!(outcome.best_estimator.predict(&x).is_ok());
    }

    #[test]
    fn test_failing_candidates_are_skipped() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y = x.column(0).to_owned();
        let g = grid(&[("subsample", vec![2.0.into(), 1.0.into()]), ("n_estimators", vec![5.into()])]);
        let config = SearchConfig {
            n_jobs: Some(1),
            ..Default::default()
        };

        let outcome = search(ModelType::GradientBoosting, &g, &x, &y, &config).unwrap();
        assert_eq!(outcome.best_params["subsample"], ParamValue::Float(1.0));

        let all_bad = grid(&[("subsample", vec![2.0.into()])]);
        assert!(search(ModelType::GradientBoosting, &all_bad, &x, &y, &config).is_err());
    }
}
