//! Workbench configuration
//!
//! Every row-count threshold that changes training behavior lives here as a
//! default so deployments can retune them without touching the orchestrators.

use crate::error::{Result, WorkbenchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Size tier a dataset falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetScale {
    Standard,
    Large,
    VeryLarge,
}

/// Row-count thresholds. All comparisons are strict (`rows > threshold`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeThresholds {
    /// Above this the validation fraction is clamped to `large_test_size_cap`
    pub validation_shrink_rows: usize,
    /// Above this AutoML uses the size-optimized search table
    pub optimized_table_rows: usize,
    /// "Large": fewer folds, sampled search, tightened parameters
    pub large_rows: usize,
    /// "Very large": tightest parameter caps, sampled evaluation
    pub very_large_rows: usize,
    /// Above this stacking computes in-sample metrics on a sample
    pub huge_rows: usize,
    /// Above this single-model cross-validation runs on a sample
    pub cv_subsample_rows: usize,
    pub search_sample_cap: usize,
    pub cv_sample_cap: usize,
    pub eval_sample_cap: usize,
    pub large_test_size_cap: f64,
    pub large_cv_folds: usize,
    pub large_max_iter: usize,
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self {
            validation_shrink_rows: 10_000,
            optimized_table_rows: 10_000,
            large_rows: 15_000,
            very_large_rows: 20_000,
            huge_rows: 30_000,
            cv_subsample_rows: 50_000,
            search_sample_cap: 10_000,
            cv_sample_cap: 10_000,
            eval_sample_cap: 5_000,
            large_test_size_cap: 0.15,
            large_cv_folds: 3,
            large_max_iter: 20,
        }
    }
}

impl SizeThresholds {
    pub fn scale(&self, rows: usize) -> DatasetScale {
        if rows > self.very_large_rows {
            DatasetScale::VeryLarge
        } else if rows > self.large_rows {
            DatasetScale::Large
        } else {
            DatasetScale::Standard
        }
    }

    pub fn is_large(&self, rows: usize) -> bool {
        rows > self.large_rows
    }

    pub fn is_very_large(&self, rows: usize) -> bool {
        rows > self.very_large_rows
    }

    /// Folds to use for `rows`, never more than requested.
    pub fn cv_folds_for(&self, rows: usize, requested: usize) -> usize {
        if self.is_large(rows) {
            requested.min(self.large_cv_folds)
        } else {
            requested
        }
    }

    /// Sample size used for hyperparameter search on large tables:
    /// `min(search_sample_cap, rows / 2)`.
    pub fn search_sample_size(&self, rows: usize) -> usize {
        self.search_sample_cap.min(rows / 2)
    }

    pub fn cv_sample_size(&self, rows: usize) -> usize {
        self.cv_sample_cap.min(rows / 2)
    }

    pub fn eval_sample_size(&self, rows: usize) -> usize {
        self.eval_sample_cap.min(rows / 4)
    }

    fn validate(&self) -> Result<()> {
        let ordered = self.large_rows <= self.very_large_rows && self.very_large_rows <= self.huge_rows;
        if !ordered {
            return Err(WorkbenchError::ConfigError(format!(
                "thresholds must be ordered: large_rows ({}) <= very_large_rows ({}) <= huge_rows ({})",
                self.large_rows, self.very_large_rows, self.huge_rows
            )));
        }
        if !(0.0..1.0).contains(&self.large_test_size_cap) || self.large_test_size_cap == 0.0 {
            return Err(WorkbenchError::ConfigError(format!(
                "large_test_size_cap must be in (0, 1), got {}",
                self.large_test_size_cap
            )));
        }
        if self.large_cv_folds < 2 {
            return Err(WorkbenchError::ConfigError(
                "large_cv_folds must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    pub thresholds: SizeThresholds,
    pub default_random_state: u64,
    pub default_test_size: f64,
    pub default_cv_folds: usize,
    pub models_dir: PathBuf,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            thresholds: SizeThresholds::default(),
            default_random_state: 42,
            default_test_size: 0.2,
            default_cv_folds: 5,
            models_dir: PathBuf::from("./models"),
        }
    }
}

impl WorkbenchConfig {
    /// Defaults overlaid with `WORKBENCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.thresholds.validate()?;
        Ok(config)
    }

    pub fn with_thresholds(mut self, thresholds: SizeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim().parse().map_err(|_| {
                WorkbenchError::ConfigError(format!("{} has an invalid value: {}", key, raw))
            })
        }

        let t = &mut self.thresholds;
        let usize_keys: [(&str, &mut usize); 11] = [
            ("WORKBENCH_VALIDATION_SHRINK_ROWS", &mut t.validation_shrink_rows),
            ("WORKBENCH_OPTIMIZED_TABLE_ROWS", &mut t.optimized_table_rows),
            ("WORKBENCH_LARGE_ROWS", &mut t.large_rows),
            ("WORKBENCH_VERY_LARGE_ROWS", &mut t.very_large_rows),
            ("WORKBENCH_HUGE_ROWS", &mut t.huge_rows),
            ("WORKBENCH_CV_SUBSAMPLE_ROWS", &mut t.cv_subsample_rows),
            ("WORKBENCH_SEARCH_SAMPLE_CAP", &mut t.search_sample_cap),
            ("WORKBENCH_CV_SAMPLE_CAP", &mut t.cv_sample_cap),
            ("WORKBENCH_EVAL_SAMPLE_CAP", &mut t.eval_sample_cap),
            ("WORKBENCH_LARGE_CV_FOLDS", &mut t.large_cv_folds),
            ("WORKBENCH_LARGE_MAX_ITER", &mut t.large_max_iter),
        ];
        for (key, slot) in usize_keys {
            if let Some(raw) = lookup(key) {
                *slot = parse(key, raw)?;
            }
        }
        if let Some(raw) = lookup("WORKBENCH_LARGE_TEST_SIZE_CAP") {
            t.large_test_size_cap = parse("WORKBENCH_LARGE_TEST_SIZE_CAP", raw)?;
        }
        if let Some(raw) = lookup("WORKBENCH_RANDOM_STATE") {
            self.default_random_state = parse("WORKBENCH_RANDOM_STATE", raw)?;
        }
        if let Some(raw) = lookup("WORKBENCH_TEST_SIZE") {
            self.default_test_size = parse("WORKBENCH_TEST_SIZE", raw)?;
        }
        if let Some(raw) = lookup("WORKBENCH_MODELS_DIR") {
            self.models_dir = PathBuf::from(raw);
        }
        self.thresholds.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_scale_boundaries_are_strict() {
        let t = SizeThresholds::default();
        assert_eq!(t.scale(15_000), DatasetScale::Standard);
        assert_eq!(t.scale(15_001), DatasetScale::Large);
        assert_eq!(t.scale(20_000), DatasetScale::Large);
        assert_eq!(t.scale(20_001), DatasetScale::VeryLarge);
    }

    #[test]
    fn test_cv_folds_never_increase() {
        let t = SizeThresholds::default();
        assert_eq!(t.cv_folds_for(14_999, 5), 5);
        assert_eq!(t.cv_folds_for(15_001, 5), 3);
        assert_eq!(t.cv_folds_for(15_001, 2), 2);
    }

    #[test]
    fn test_sample_sizes() {
        let t = SizeThresholds::default();
        assert_eq!(t.search_sample_size(16_000), 8_000);
        assert_eq!(t.search_sample_size(60_000), 10_000);
        assert_eq!(t.eval_sample_size(24_000), 5_000);
        assert_eq!(t.eval_sample_size(16_000), 4_000);
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("WORKBENCH_LARGE_ROWS", "1000"),
            ("WORKBENCH_RANDOM_STATE", "7"),
        ]
        .into_iter()
        .collect();

        let mut config = WorkbenchConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.thresholds.large_rows, 1000);
        assert_eq!(config.default_random_state, 7);
        assert_eq!(config.thresholds.very_large_rows, 20_000);
    }

    #[test]
    fn test_env_overlay_covers_large_table_caps() {
        let vars: HashMap<&str, &str> = [
            ("WORKBENCH_LARGE_TEST_SIZE_CAP", "0.1"),
            ("WORKBENCH_LARGE_MAX_ITER", "12"),
        ]
        .into_iter()
        .collect();

        let mut config = WorkbenchConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.thresholds.large_test_size_cap, 0.1);
        assert_eq!(config.thresholds.large_max_iter, 12);

        let mut config = WorkbenchConfig::default();
        let result = config.apply_env(|k| {
            (k == "WORKBENCH_LARGE_TEST_SIZE_CAP").then(|| "1.5".to_string())
        });
        assert!(matches!(result, Err(WorkbenchError::ConfigError(_))));
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = WorkbenchConfig::default();
        let result = config.apply_env(|k| {
            (k == "WORKBENCH_LARGE_ROWS").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(WorkbenchError::ConfigError(_))));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: WorkbenchConfig =
            serde_json::from_str(r#"{"thresholds": {"large_rows": 500}}"#).unwrap();
        assert_eq!(config.thresholds.large_rows, 500);
        assert_eq!(config.thresholds.huge_rows, 30_000);
        assert_eq!(config.default_random_state, 42);
    }
}
