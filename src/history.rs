// src/history.rs

//! History store collaborator: the durable, append-only list of finished
//! executions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{BddrunError, Result};
use crate::fs::FileSystem;
use crate::record::ExecutionRecord;
use crate::tags::normalize_tag;

/// Durable collection of terminal execution records.
///
/// Implementations are called from blocking contexts (the orchestrator
/// wraps appends in `spawn_blocking`), so plain synchronous IO is fine.
pub trait HistoryStore: Send + Sync {
    /// Durably append a record. Returns only once the record is persisted.
    fn append(&self, record: &ExecutionRecord) -> Result<()>;

    fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// Records whose `tags` contain `tag`, newest first.
    fn by_tag(&self, tag: &str) -> Result<Vec<ExecutionRecord>>;

    /// The `limit` newest records.
    fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>>;

    /// Remove a record. Returns whether anything was removed.
    fn delete(&self, execution_id: &str) -> Result<bool>;

    fn contains(&self, execution_id: &str) -> Result<bool> {
        Ok(self.get(execution_id)?.is_some())
    }
}

/// On-disk layout: `{"executions": [...]}` in append order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    executions: Vec<ExecutionRecord>,
}

/// History store backed by a single pretty-printed JSON file.
///
/// Every mutation is a read-modify-write of the whole file, serialised by an
/// in-process mutex.
#[derive(Debug)]
pub struct JsonHistoryStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HistoryFile> {
        if !self.fs.exists(&self.path) {
            return Ok(HistoryFile::default());
        }
        let contents = self.fs.read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(HistoryFile::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, history: &HistoryFile) -> Result<()> {
        let json = serde_json::to_vec_pretty(history)?;
        self.fs.write(&self.path, &json).map_err(|e| {
            BddrunError::HistoryError(format!(
                "failed to save execution history to {}: {e:#}",
                self.path.display()
            ))
        })
    }

    fn newest_first(mut records: Vec<ExecutionRecord>) -> Vec<ExecutionRecord> {
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&self, record: &ExecutionRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| BddrunError::HistoryError("history lock poisoned".to_string()))?;

        let mut history = self.load()?;
        if history
            .executions
            .iter()
            .any(|e| e.execution_id() == record.execution_id())
        {
            return Err(BddrunError::HistoryError(format!(
                "execution {} is already recorded",
                record.execution_id()
            )));
        }

        history.executions.push(record.clone());
        self.save(&history)?;

        info!(
            execution_id = %record.execution_id(),
            status = %record.status(),
            "execution recorded"
        );
        Ok(())
    }

    fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self
            .load()?
            .executions
            .into_iter()
            .find(|e| e.execution_id() == execution_id))
    }

    fn by_tag(&self, tag: &str) -> Result<Vec<ExecutionRecord>> {
        let Some(tag) = normalize_tag(tag) else {
            return Ok(Vec::new());
        };
        let matching = self
            .load()?
            .executions
            .into_iter()
            .filter(|e| e.tags.iter().any(|t| *t == tag))
            .collect();
        Ok(Self::newest_first(matching))
    }

    fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut records = Self::newest_first(self.load()?.executions);
        records.truncate(limit);
        Ok(records)
    }

    fn delete(&self, execution_id: &str) -> Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| BddrunError::HistoryError("history lock poisoned".to_string()))?;

        let mut history = self.load()?;
        let before = history.executions.len();
        history.executions.retain(|e| e.execution_id() != execution_id);
        let removed = history.executions.len() != before;

        if removed {
            self.save(&history)?;
            debug!(execution_id, "execution deleted from history");
        }
        Ok(removed)
    }
}
