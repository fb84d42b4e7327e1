// src/record.rs

//! The durable execution record and its forward-only status transitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BddrunError, Result};
use crate::types::{ExecutionStatus, ExecutionType, TagLogic};

/// Value stored in `duration` when the runner output has no usable timing.
pub const UNKNOWN_DURATION: &str = "N/A";

/// Pass/fail/skip counters for scenarios or steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// One run attempt.
///
/// Created in memory when a run is accepted, mutated only by the task that
/// owns the run, and appended to the history store once it is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    execution_id: String,
    pub execution_type: ExecutionType,
    status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
    /// Runner-reported duration, `"N/A"` when the output had none.
    #[serde(default = "unknown_duration")]
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    #[serde(default)]
    pub feature_files: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_logic: Option<TagLogic>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub total_scenarios: u32,
    #[serde(default)]
    pub passed_scenarios: u32,
    #[serde(default)]
    pub failed_scenarios: u32,
    #[serde(default)]
    pub skipped_scenarios: u32,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub passed_steps: u32,
    #[serde(default)]
    pub failed_steps: u32,
    #[serde(default)]
    pub skipped_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ExecutionRecord {
    /// A fresh `PENDING` record stamped with the current time.
    pub fn new(execution_id: impl Into<String>, execution_type: ExecutionType) -> Self {
        Self {
            execution_id: execution_id.into(),
            execution_type,
            status: ExecutionStatus::Pending,
            timestamp: Utc::now(),
            duration: unknown_duration(),
            report_path: None,
            feature_files: Vec::new(),
            tags: Vec::new(),
            tag_logic: None,
            exclude_tags: Vec::new(),
            total_scenarios: 0,
            passed_scenarios: 0,
            failed_scenarios: 0,
            skipped_scenarios: 0,
            total_steps: 0,
            passed_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
            notes: None,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn scenarios(&self) -> Counts {
        Counts {
            total: self.total_scenarios,
            passed: self.passed_scenarios,
            failed: self.failed_scenarios,
            skipped: self.skipped_scenarios,
        }
    }

    pub fn steps(&self) -> Counts {
        Counts {
            total: self.total_steps,
            passed: self.passed_steps,
            failed: self.failed_steps,
            skipped: self.skipped_steps,
        }
    }

    pub fn set_scenarios(&mut self, counts: Counts) {
        self.total_scenarios = counts.total;
        self.passed_scenarios = counts.passed;
        self.failed_scenarios = counts.failed;
        self.skipped_scenarios = counts.skipped;
    }

    pub fn set_steps(&mut self, counts: Counts) {
        self.total_steps = counts.total;
        self.passed_steps = counts.passed;
        self.failed_steps = counts.failed;
        self.skipped_steps = counts.skipped;
    }

    /// Move to `next`, refusing backwards moves and any move out of a
    /// terminal state.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BddrunError::Other(anyhow::anyhow!(
                "illegal status transition {} -> {} for execution {}",
                self.status,
                next,
                self.execution_id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Append a human-readable explanation, keeping earlier notes.
    pub fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}; {note}"),
            _ => note,
        });
    }
}

fn unknown_duration() -> String {
    UNKNOWN_DURATION.to_string()
}
