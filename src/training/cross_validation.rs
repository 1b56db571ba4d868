//! K-fold splitting and cross-validated scoring

use super::models::Regressor;
use crate::error::{Result, WorkbenchError};
use crate::metrics::mean_std;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// K-fold splitter. The first `n % k` folds get one extra row.
#[derive(Debug, Clone)]
pub struct KFold {
    n_splits: usize,
    shuffle: bool,
    random_state: Option<u64>,
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            random_state: None,
        }
    }

    /// Shuffle row order before cutting folds
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.random_state = Some(seed);
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    pub fn split(&self, n_samples: usize) -> Result<Vec<CVSplit>> {
        let n_splits = self.n_splits;
        if n_splits < 2 {
            return Err(WorkbenchError::CrossValidationFailure(
                "n_splits must be at least 2".to_string(),
            ));
        }
        if n_samples < n_splits {
            return Err(WorkbenchError::CrossValidationFailure(format!(
                "n_samples ({}) must be >= n_splits ({})",
                n_samples, n_splits
            )));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            let mut rng = match self.random_state {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            };
            indices.shuffle(&mut rng);
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;
        let mut splits = Vec::with_capacity(n_splits);
        let mut current = 0;

        for fold_idx in 0..n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let test_indices = indices[current..current + fold_size].to_vec();
            let train_indices = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();

            splits.push(CVSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
            current += fold_size;
        }

        Ok(splits)
    }
}

/// Cross-validation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CVResults {
    /// Per-fold negative mean squared error
    pub scores: Vec<f64>,
    pub mean_score: f64,
    /// Population standard deviation of the fold scores
    pub std_score: f64,
    pub n_folds: usize,
}

impl CVResults {
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let (mean_score, std_score) = mean_std(&scores);
        Self {
            n_folds: scores.len(),
            scores,
            mean_score,
            std_score,
        }
    }

    /// Mean MSE (the sign-flipped mean score)
    pub fn mean_mse(&self) -> f64 {
        -self.mean_score
    }
}

/// Fit a fresh copy of `estimator` on the split's train rows and predict its
/// test rows.
pub fn fit_predict_fold(
    estimator: &Regressor,
    x: &Array2<f64>,
    y: &Array1<f64>,
    split: &CVSplit,
) -> Result<Array1<f64>> {
    let x_train = x.select(Axis(0), &split.train_indices);
    let y_train = y.select(Axis(0), &split.train_indices);
    let x_test = x.select(Axis(0), &split.test_indices);

    let mut model = estimator.unfitted();
    model.fit(&x_train, &y_train)?;
    model.predict(&x_test)
}

/// Out-of-fold predictions: every row is predicted by the model that did not
/// see it.
pub fn cross_val_predict(
    estimator: &Regressor,
    x: &Array2<f64>,
    y: &Array1<f64>,
    splits: &[CVSplit],
) -> Result<Array1<f64>> {
    let mut oof = Array1::zeros(x.nrows());
    for split in splits {
        let preds = fit_predict_fold(estimator, x, y, split)?;
        for (local, &row) in split.test_indices.iter().enumerate() {
            oof[row] = preds[local];
        }
    }
    Ok(oof)
}

/// Negative-MSE score per fold
pub fn cross_val_score(
    estimator: &Regressor,
    x: &Array2<f64>,
    y: &Array1<f64>,
    kfold: &KFold,
) -> Result<CVResults> {
    if x.nrows() != y.len() {
        return Err(WorkbenchError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    let splits = kfold.split(x.nrows())?;
    let mut scores = Vec::with_capacity(splits.len());

    for split in &splits {
        let preds = fit_predict_fold(estimator, x, y, split)?;
        let y_test = y.select(Axis(0), &split.test_indices);
        let mse = (&y_test - &preds).mapv(|e| e * e).mean().unwrap_or(f64::NAN);
        if !mse.is_finite() {
            return Err(WorkbenchError::CrossValidationFailure(format!(
                "fold {} produced a non-finite error",
                split.fold_idx
            )));
        }
        scores.push(-mse);
    }

    Ok(CVResults::from_scores(scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::linear_models::LinearRegression;

    #[test]
    fn test_k_fold_covers_every_row_once() {
        let splits = KFold::new(5).split(100).unwrap();
        assert_eq!(splits.len(), 5);
        for split in &splits {
            assert_eq!(split.test_indices.len(), 20);
            assert_eq!(split.train_indices.len(), 80);
        }

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_uneven_folds() {
        let splits = KFold::new(3).split(10).unwrap();
        let sizes: Vec<usize> = splits.iter().map(|s| s.test_indices.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn test_shuffled_split_is_seeded() {
        let a = KFold::new(4).shuffled(42).split(40).unwrap();
        let b = KFold::new(4).shuffled(42).split(40).unwrap();
        assert_eq!(a[0].test_indices, b[0].test_indices);
        assert_ne!(a[0].test_indices, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_rejects_too_few_rows() {
        assert!(KFold::new(5).split(3).is_err());
        assert!(KFold::new(1).split(30).is_err());
    }

    #[test]
    fn test_cross_val_score_on_exact_line() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        let model = Regressor::Linear(LinearRegression::new());

        let results = cross_val_score(&model, &x, &y, &KFold::new(5).shuffled(42)).unwrap();
        assert_eq!(results.n_folds, 5);
        assert!(results.mean_mse() < 1e-10, "mse {}", results.mean_mse());
        assert!(results.scores.iter().all(|s| *s <= 0.0));
    }

    #[test]
    fn test_cross_val_predict_fills_every_row() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| 3.0 - v);
        let model = Regressor::Linear(LinearRegression::new());
        let splits = KFold::new(4).shuffled(1).split(20).unwrap();

        let oof = cross_val_predict(&model, &x, &y, &splits).unwrap();
        for (p, t) in oof.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-8);
        }
    }
}
