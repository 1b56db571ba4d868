//! Feature/target tables
//!
//! Converts a polars `DataFrame` into the dense matrices every estimator
//! consumes, and provides the seeded splitting and sampling helpers shared by
//! the orchestrators.

use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use polars::prelude::*;
use rand::seq::index;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Dense view of a feature/target table
#[derive(Debug, Clone)]
pub struct Dataset {
    pub feature_columns: Vec<String>,
    pub target_columns: Vec<String>,
    /// One row per sample, columns in `feature_columns` order
    pub x: Array2<f64>,
    /// One column per target, in `target_columns` order
    pub y: Array2<f64>,
}

impl Dataset {
    /// Split `df` into features and targets.
    ///
    /// When `feature_columns` is `None` every non-target column is a feature.
    pub fn from_frame(
        df: &DataFrame,
        target_columns: &[String],
        feature_columns: Option<&[String]>,
    ) -> Result<Self> {
        if target_columns.is_empty() {
            return Err(WorkbenchError::MissingTargetColumns);
        }
        if df.height() == 0 {
            return Err(WorkbenchError::MissingTrainingData(
                "the training table has no rows".to_string(),
            ));
        }

        let present: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.as_str().to_string())
            .collect();
        if let Some(missing) = target_columns.iter().find(|t| !present.contains(t)) {
            return Err(WorkbenchError::FeatureNotFound(format!(
                "target column '{}' is not in the table",
                missing
            )));
        }

        let feature_columns: Vec<String> = match feature_columns {
            Some(cols) => {
                if let Some(overlap) = cols.iter().find(|c| target_columns.contains(c)) {
                    return Err(WorkbenchError::DataError(format!(
                        "column '{}' cannot be both a feature and a target",
                        overlap
                    )));
                }
                cols.to_vec()
            }
            None => present
                .into_iter()
                .filter(|c| !target_columns.contains(c))
                .collect(),
        };
        if feature_columns.is_empty() {
            return Err(WorkbenchError::MissingTrainingData(
                "the table has no feature columns".to_string(),
            ));
        }

        let x = columns_to_array2(df, &feature_columns)?;
        let y = columns_to_array2(df, target_columns)?;

        Ok(Self {
            feature_columns,
            target_columns: target_columns.to_vec(),
            x,
            y,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn target(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.y.column(idx)
    }

    pub fn target_owned(&self, idx: usize) -> Array1<f64> {
        self.y.column(idx).to_owned()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        Dataset {
            feature_columns: self.feature_columns.clone(),
            target_columns: self.target_columns.clone(),
            x: self.x.select(Axis(0), rows),
            y: self.y.select(Axis(0), rows),
        }
    }
}

/// Extract named columns from a DataFrame into a row-major `Array2<f64>`.
pub fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|col_name| {
            let column = df
                .column(col_name)
                .map_err(|_| WorkbenchError::FeatureNotFound(col_name.clone()))?;
            let as_f64 = column.cast(&DataType::Float64)?;
            as_f64
                .f64()?
                .into_iter()
                .enumerate()
                .map(|(row, v)| {
                    v.ok_or_else(|| {
                        WorkbenchError::DataError(format!(
                            "column '{}' has a missing value at row {}",
                            col_name, row
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, col_names.len()), |(r, c)| {
        col_refs[c][r]
    }))
}

/// Names of `required` columns absent from `df`
pub fn missing_columns(df: &DataFrame, required: &[String]) -> Vec<String> {
    let present: Vec<&str> = df
        .get_column_names()
        .iter()
        .map(|name| name.as_str())
        .collect();
    required
        .iter()
        .filter(|c| !present.contains(&c.as_str()))
        .cloned()
        .collect()
}

pub fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Shuffled train/validation index split. The validation part holds
/// `ceil(test_size * n)` rows; both parts are non-empty.
pub fn train_test_indices(n: usize, test_size: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(WorkbenchError::invalid_param(
            "test_size",
            test_size,
            "must be between 0 and 1",
        ));
    }
    let n_test = ((n as f64) * test_size).ceil() as usize;
    if n < 2 || n_test == 0 || n_test >= n {
        return Err(WorkbenchError::MissingTrainingData(format!(
            "{} rows cannot be split with test_size = {}",
            n, test_size
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices[n_test..].to_vec();
    indices.truncate(n_test);
    Ok((train, indices))
}

/// Uniform sample of `k` distinct row indices out of `n`, sorted.
pub fn sample_indices(n: usize, k: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    if k >= n {
        return (0..n).collect();
    }
    let mut picked = index::sample(rng, n, k).into_vec();
    picked.sort_unstable();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        df!(
            "x1" => &[1.0, 2.0, 3.0, 4.0, 5.0],
            "x2" => &[10i32, 20, 30, 40, 50],
            "y" => &[2.0, 4.0, 6.0, 8.0, 10.0]
        )
        .unwrap()
    }

    #[test]
    fn test_from_frame_partitions_columns() {
        let ds = Dataset::from_frame(&frame(), &["y".to_string()], None).unwrap();
        assert_eq!(ds.feature_columns, vec!["x1", "x2"]);
        assert_eq!(ds.x.shape(), &[5, 2]);
        assert_eq!(ds.x[[2, 1]], 30.0);
        assert_eq!(ds.target(0)[4], 10.0);
    }

    #[test]
    fn test_from_frame_errors() {
        let df = frame();
        assert!(matches!(
            Dataset::from_frame(&df, &[], None),
            Err(WorkbenchError::MissingTargetColumns)
        ));
        assert!(matches!(
            Dataset::from_frame(&df, &["nope".to_string()], None),
            Err(WorkbenchError::FeatureNotFound(_))
        ));
        let overlap = ["y".to_string()];
        assert!(Dataset::from_frame(&df, &["y".to_string()], Some(&overlap)).is_err());
    }

    #[test]
    fn test_split_is_deterministic() {
        let (train_a, test_a) = train_test_indices(100, 0.2, 42).unwrap();
        let (train_b, test_b) = train_test_indices(100, 0.2, 42).unwrap();
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 20);
        assert_eq!(train_a.len(), 80);

        let (_, test_c) = train_test_indices(100, 0.2, 7).unwrap();
        assert_ne!(test_a, test_c);
    }

    #[test]
    fn test_split_rejects_degenerate() {
        assert!(train_test_indices(1, 0.2, 42).is_err());
        assert!(train_test_indices(10, 0.0, 42).is_err());
    }

    #[test]
    fn test_sample_indices() {
        let mut rng = seeded_rng(Some(1));
        let picked = sample_indices(1000, 100, &mut rng);
        assert_eq!(picked.len(), 100);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sample_indices(5, 10, &mut rng), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_missing_columns() {
        let missing = missing_columns(&frame(), &["x1".to_string(), "x9".to_string()]);
        assert_eq!(missing, vec!["x9".to_string()]);
    }
}
