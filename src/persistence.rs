//! Durable storage for trained-model records

use crate::error::{Result, WorkbenchError};
use crate::record::TrainedModelRecord;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

/// Save/load collaborator. One stored record per model id.
pub trait ModelStore {
    fn save(&self, record: &TrainedModelRecord) -> Result<PathBuf>;
    fn load(&self, path: &Path) -> Result<TrainedModelRecord>;
}

/// Writes `<dir>/<model_id>.json`
#[derive(Debug, Clone)]
pub struct JsonModelStore {
    dir: PathBuf,
}

impl JsonModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, model_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", model_id))
    }
}

impl ModelStore for JsonModelStore {
    fn save(&self, record: &TrainedModelRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&record.model_id);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(writer, record)?;
        info!(model_id = %record.model_id, path = %path.display(), "Saved model");
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<TrainedModelRecord> {
        if !path.exists() {
            return Err(WorkbenchError::ModelNotFound(path.display().to_string()));
        }
        let reader = BufReader::new(File::open(path)?);
        let record: TrainedModelRecord = serde_json::from_reader(reader)?;
        info!(model_id = %record.model_id, path = %path.display(), "Loaded model");
        Ok(record)
    }
}
