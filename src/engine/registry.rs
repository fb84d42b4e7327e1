// src/engine/registry.rs

//! Execution registry: `execution id -> in-flight process`.
//!
//! The registry is the single owner of each [`ProcessHandle`] between launch
//! and removal. Removal happens exactly once, by whichever of natural
//! completion, the watchdog or an explicit cancel gets there first; that
//! path also claims the run's [`TerminationFlag`], which the run task reads
//! after the process has exited to tell the three apart.
//!
//! Ids are reserved from acceptance until the final record is in the history
//! store. In between removal and that append, the run's latest record stays
//! visible as a finishing snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{debug, info, warn};

use crate::errors::{BddrunError, Result};
use crate::exec::ProcessHandle;
use crate::progress::{PROGRESS_ERROR, ProgressBroadcaster};
use crate::record::ExecutionRecord;

/// Progress message published when a run is cancelled.
pub const CANCELLED_MESSAGE: &str = "Execution cancelled by user";

/// Who ended a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own.
    Completed,
    /// `cancel` was called.
    Cancelled,
    /// The watchdog fired.
    TimedOut,
    /// The run task failed unexpectedly and cleaned up after itself.
    Aborted,
}

/// Single-assignment record of who ended a run.
#[derive(Debug, Default)]
pub struct TerminationFlag(OnceLock<Termination>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag if nobody has yet. Returns whether this call won.
    pub fn claim(&self, reason: Termination) -> bool {
        self.0.set(reason).is_ok()
    }

    pub fn get(&self) -> Option<Termination> {
        self.0.get().copied()
    }
}

#[derive(Debug)]
struct RunningExecution {
    handle: ProcessHandle,
    flag: Arc<TerminationFlag>,
    record: ExecutionRecord,
}

/// Point-in-time view of an in-flight execution.
#[derive(Debug, Clone)]
pub struct RunningSnapshot {
    pub record: ExecutionRecord,
    pub pid: Option<u32>,
    pub alive: bool,
}

#[derive(Debug, Default)]
struct Entries {
    running: HashMap<String, RunningExecution>,
    /// Removed from `running` (or never launched), not yet persisted.
    finishing: HashMap<String, ExecutionRecord>,
    /// Every id between `reserve`/`register` and `release`.
    reserved: HashSet<String>,
}

impl Entries {
    /// Move a running entry to `finishing`, keeping its record visible.
    fn retire(&mut self, execution_id: &str) -> Option<RunningExecution> {
        let entry = self.running.remove(execution_id)?;
        self.finishing
            .insert(execution_id.to_string(), entry.record.clone());
        Some(entry)
    }
}

/// Concurrency-safe map of in-flight executions.
///
/// Every operation holds the internal lock only for a map access, never
/// across an `.await`.
#[derive(Debug)]
pub struct ExecutionRegistry {
    entries: Mutex<Entries>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl ExecutionRegistry {
    pub fn new(broadcaster: Arc<ProgressBroadcaster>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            broadcaster,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `execution_id` for a new run. `false` if it is already in use.
    pub fn reserve(&self, execution_id: &str) -> bool {
        let inserted = self.lock().reserved.insert(execution_id.to_string());
        if !inserted {
            debug!(execution_id, "execution id already reserved");
        }
        inserted
    }

    /// Forget `execution_id` entirely once its record is persisted, or its
    /// start was rejected.
    pub fn release(&self, execution_id: &str) {
        let mut entries = self.lock();
        entries.reserved.remove(execution_id);
        entries.finishing.remove(execution_id);
        if entries.running.remove(execution_id).is_some() {
            debug!(execution_id, "dropped leftover running entry on release");
        }
    }

    /// Take ownership of `handle` for `record`'s execution id.
    ///
    /// `record` is kept as the snapshot returned by [`lookup`](Self::lookup).
    /// A handle rejected because the id is taken is killed in the background.
    pub fn register(
        &self,
        record: ExecutionRecord,
        handle: ProcessHandle,
        flag: Arc<TerminationFlag>,
    ) -> Result<()> {
        let id = record.execution_id().to_string();
        let mut entries = self.lock();
        if entries.running.contains_key(&id) || entries.finishing.contains_key(&id) {
            drop(entries);
            warn!(execution_id = %id, "execution id already registered; killing new process");
            tokio::spawn(async move { handle.kill().await });
            return Err(BddrunError::validation(format!(
                "execution {id} is already running"
            )));
        }
        debug!(execution_id = %id, pid = ?handle.pid(), "execution registered");
        entries.reserved.insert(id.clone());
        entries.running.insert(
            id,
            RunningExecution {
                handle,
                flag,
                record,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, execution_id: &str) -> Option<RunningSnapshot> {
        self.lock().running.get(execution_id).map(|e| RunningSnapshot {
            record: e.record.clone(),
            pid: e.handle.pid(),
            alive: e.handle.is_alive(),
        })
    }

    /// Latest in-memory record of a run that is not yet persisted.
    pub fn record(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let entries = self.lock();
        entries
            .running
            .get(execution_id)
            .map(|e| e.record.clone())
            .or_else(|| entries.finishing.get(execution_id).cloned())
    }

    /// Replace the visible record of a run that has left `running`.
    pub fn stage(&self, record: ExecutionRecord) {
        let mut entries = self.lock();
        let id = record.execution_id().to_string();
        entries.reserved.insert(id.clone());
        entries.finishing.insert(id, record);
    }

    /// Whether `execution_id` is reserved, running or finishing.
    pub fn contains(&self, execution_id: &str) -> bool {
        let entries = self.lock();
        entries.reserved.contains(execution_id)
            || entries.running.contains_key(execution_id)
            || entries.finishing.contains_key(execution_id)
    }

    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().running.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of running executions.
    pub fn len(&self) -> usize {
        self.lock().running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().running.is_empty()
    }

    /// Remove the entry for a process that ended on its own.
    ///
    /// Returns `false` if another path already removed it.
    pub fn complete(&self, execution_id: &str) -> bool {
        let Some(entry) = self.lock().retire(execution_id) else {
            return false;
        };
        entry.flag.claim(Termination::Completed);
        debug!(execution_id, "execution removed from registry on completion");
        true
    }

    /// Remove the entry, record `reason` and force-kill the process.
    ///
    /// Returns `false` without side effects if the entry is already gone or
    /// its process has already exited; natural completion owns that run.
    /// Returns once the kill has been delivered and the process reaped.
    pub async fn terminate(&self, execution_id: &str, reason: Termination) -> bool {
        let entry = {
            let mut entries = self.lock();
            match entries.running.get(execution_id) {
                None => {
                    debug!(execution_id, ?reason, "terminate: execution not registered");
                    return false;
                }
                Some(entry) if !entry.handle.is_alive() || entry.flag.get().is_some() => {
                    debug!(
                        execution_id,
                        ?reason,
                        existing = ?entry.flag.get(),
                        "terminate: process already exited"
                    );
                    return false;
                }
                Some(_) => {}
            }
            let Some(entry) = entries.retire(execution_id) else {
                return false;
            };
            if !entry.flag.claim(reason) {
                warn!(
                    execution_id,
                    ?reason,
                    existing = ?entry.flag.get(),
                    "termination already claimed"
                );
                return false;
            }
            entry
        };

        info!(execution_id, ?reason, pid = ?entry.handle.pid(), "terminating execution");
        entry.handle.kill().await;
        true
    }

    /// Cancel a running execution.
    ///
    /// Unknown or already-exited ids return `false` and publish nothing.
    /// Otherwise the process is killed, a cancellation event is published
    /// and `true` is returned.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        if !self.terminate(execution_id, Termination::Cancelled).await {
            return false;
        }
        self.broadcaster
            .publish(execution_id, CANCELLED_MESSAGE, PROGRESS_ERROR);
        true
    }
}
