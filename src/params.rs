//! Hyperparameter values, maps and grids

use crate::error::{Result, WorkbenchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single hyperparameter value as it arrives from a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

/// Hyperparameters for one estimator, ordered by key
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Candidate values per hyperparameter
pub type ParamGrid = BTreeMap<String, Vec<ParamValue>>;

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "None"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl ParamValue {
    /// A layer-size tuple such as `(50, 50)`
    pub fn layers(sizes: &[i64]) -> Self {
        ParamValue::List(sizes.iter().map(|&s| ParamValue::Int(s)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Typed readers used by estimator constructors. A missing key yields the
/// default; a present key of the wrong type is an `InvalidParameter`.
pub(crate) struct ParamReader<'a> {
    params: &'a ParamMap,
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a ParamMap) -> Self {
        Self { params }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .filter(|x| x.is_finite())
                .ok_or_else(|| WorkbenchError::invalid_param(key, v, "expected a finite number")),
        }
    }

    pub fn positive_f64_or(&self, key: &str, default: f64) -> Result<f64> {
        let value = self.f64_or(key, default)?;
        if value <= 0.0 {
            return Err(WorkbenchError::invalid_param(key, value, "must be positive"));
        }
        Ok(value)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_i64()
                .filter(|&i| i >= 0)
                .map(|i| i as usize)
                .ok_or_else(|| {
                    WorkbenchError::invalid_param(key, v, "expected a non-negative integer")
                }),
        }
    }

    /// `null` (or absence with a `None` default) means unlimited
    pub fn optional_usize(&self, key: &str, default: Option<usize>) -> Result<Option<usize>> {
        match self.params.get(key) {
            None => Ok(default),
            Some(ParamValue::Null) => Ok(None),
            Some(_) => self.usize_or(key, 0).map(Some),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| WorkbenchError::invalid_param(key, v, "expected a boolean")),
        }
    }

    pub fn seed(&self, key: &str) -> Result<Option<u64>> {
        match self.params.get(key) {
            None | Some(ParamValue::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .filter(|&i| i >= 0)
                .map(|i| Some(i as u64))
                .ok_or_else(|| WorkbenchError::invalid_param(key, v, "expected a seed integer")),
        }
    }

    /// `n_jobs`: `None`/`-1` means every core, a positive count bounds workers
    pub fn n_jobs(&self) -> Result<Option<usize>> {
        match self.params.get("n_jobs") {
            None | Some(ParamValue::Null) => Ok(None),
            Some(v) => match v.as_i64() {
                Some(-1) => Ok(None),
                Some(n) if n > 0 => Ok(Some(n as usize)),
                _ => Err(WorkbenchError::invalid_param(
                    "n_jobs",
                    v,
                    "expected -1, null or a positive integer",
                )),
            },
        }
    }

    pub fn str_or(&self, key: &str, default: &'a str) -> Result<&'a str> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_str()
                .ok_or_else(|| WorkbenchError::invalid_param(key, v, "expected a string")),
        }
    }

    /// Accepts a single integer or a list of integers
    pub fn layers_or(&self, key: &str, default: &[usize]) -> Result<Vec<usize>> {
        let invalid = |v: &ParamValue| {
            WorkbenchError::invalid_param(key, v, "expected a positive integer or a list of them")
        };
        match self.params.get(key) {
            None => Ok(default.to_vec()),
            Some(ParamValue::List(items)) => {
                let sizes = items
                    .iter()
                    .map(|item| item.as_i64().filter(|&s| s > 0).map(|s| s as usize))
                    .collect::<Option<Vec<usize>>>()
                    .filter(|sizes| !sizes.is_empty());
                sizes.ok_or_else(|| invalid(&ParamValue::List(items.clone())))
            }
            Some(v) => v
                .as_i64()
                .filter(|&s| s > 0)
                .map(|s| vec![s as usize])
                .ok_or_else(|| invalid(v)),
        }
    }
}

/// Expand a grid into every combination, in key order then candidate order.
pub fn expand_grid(grid: &ParamGrid) -> Vec<ParamMap> {
    let mut combos: Vec<ParamMap> = vec![ParamMap::new()];
    for (key, candidates) in grid {
        if candidates.is_empty() {
            continue;
        }
        let mut next = Vec::with_capacity(combos.len() * candidates.len());
        for combo in &combos {
            for value in candidates {
                let mut extended = combo.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Wrap every value of a direct-fit map as a one-candidate grid
pub fn singleton_grid(params: &ParamMap) -> ParamGrid {
    params
        .iter()
        .map(|(k, v)| (k.clone(), vec![v.clone()]))
        .collect()
}

/// Build a grid literal: `grid(&[("n_estimators", vec![50.into()])])`
pub fn grid(entries: &[(&str, Vec<ParamValue>)]) -> ParamGrid {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
