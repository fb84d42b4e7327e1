//! Stand-ins for the orchestrator's collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::Command;

use bddrun::catalog::FeatureCatalog;
use bddrun::errors::{BddrunError, Result};
use bddrun::exec::process;
use bddrun::exec::{
    CommandSpec, CucumberSummaryParser, OutputParser, ProcessLauncher, RunSummary, SpawnedProcess,
};
use bddrun::history::HistoryStore;
use bddrun::record::ExecutionRecord;
use bddrun::tags::{TagValidator, normalize_all, normalize_tag};
use bddrun::types::TagLogic;

/// Environment variable holding the report path the runner was asked for.
pub const REPORT_ENV: &str = "BDDRUN_REPORT";
/// Environment variable holding the runner arguments, space separated.
pub const ARGS_ENV: &str = "BDDRUN_ARGS";

/// A launcher that:
/// - records every command spec it is asked to launch
/// - runs a `sh -c` script instead of the real runner.
///
/// The script sees the requested report path in `$BDDRUN_REPORT` and the
/// runner arguments in `$BDDRUN_ARGS`. Use `exec sleep N` for long-running
/// scripts so a kill reaches the process that holds the output pipes.
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    shell: String,
    script: String,
    requested: Arc<Mutex<Vec<CommandSpec>>>,
}

impl ScriptLauncher {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            shell: "sh".to_string(),
            script: script.into(),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A launcher whose every launch fails with `LaunchError`.
    pub fn unlaunchable() -> Self {
        Self {
            shell: "/nonexistent/bddrun-test-shell".to_string(),
            ..Self::new("true")
        }
    }

    /// Command specs received so far, in order.
    pub fn requested(&self) -> Vec<CommandSpec> {
        self.requested.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.requested.lock().unwrap().len()
    }
}

impl ProcessLauncher for ScriptLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<SpawnedProcess> {
        self.requested.lock().unwrap().push(spec.clone());

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.script);
        if let Some(report) = spec
            .property("cucumber.plugin")
            .and_then(|p| p.strip_prefix("html:"))
        {
            cmd.env(REPORT_ENV, report);
        }
        cmd.env(ARGS_ENV, spec.args.join(" "));

        process::spawn(cmd, &self.shell)
    }
}

/// In-memory history store.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<ExecutionRecord>>,
    fail_appends: Mutex<bool>,
    append_delay: Mutex<Option<Duration>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ExecutionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make every subsequent `append` fail.
    pub fn fail_appends(&self, fail: bool) {
        *self.fail_appends.lock().unwrap() = fail;
    }

    /// Block every subsequent `append` for `delay` before storing.
    pub fn delay_appends(&self, delay: Duration) {
        *self.append_delay.lock().unwrap() = Some(delay);
    }

    /// Everything appended so far, in append order.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().clone()
    }

    /// How many times `execution_id` was appended.
    pub fn append_count(&self, execution_id: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.execution_id() == execution_id)
            .count()
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, record: &ExecutionRecord) -> Result<()> {
        let delay = *self.append_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if *self.fail_appends.lock().unwrap() {
            return Err(BddrunError::HistoryError("append disabled".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.execution_id() == execution_id)
            .cloned())
    }

    fn by_tag(&self, tag: &str) -> Result<Vec<ExecutionRecord>> {
        let Some(tag) = normalize_tag(tag) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.tags.contains(&tag))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    fn recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut out = self.records.lock().unwrap().clone();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit);
        Ok(out)
    }

    fn delete(&self, execution_id: &str) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.execution_id() != execution_id);
        Ok(records.len() != before)
    }
}

/// Cucumber parser that panics on output containing `trigger`.
#[derive(Debug)]
pub struct ExplodingParser {
    trigger: String,
    inner: CucumberSummaryParser,
}

impl ExplodingParser {
    pub fn new(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            inner: CucumberSummaryParser::new().expect("parser patterns compile"),
        }
    }
}

impl OutputParser for ExplodingParser {
    fn summarize(&self, output: &str) -> RunSummary {
        if output.contains(&self.trigger) {
            panic!("summary parser hit {:?}", self.trigger);
        }
        self.inner.summarize(output)
    }
}

/// Fixed list of features with their tags.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    features: Vec<(String, Vec<String>)>,
}

impl StaticCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_feature(mut self, name: &str, tags: &[&str]) -> Self {
        self.features
            .push((name.to_string(), normalize_all(tags)));
        self.features.sort_by(|a, b| a.0.cmp(&b.0));
        self
    }
}

impl FeatureCatalog for StaticCatalog {
    fn all_features(&self) -> Result<Vec<String>> {
        Ok(self.features.iter().map(|(n, _)| n.clone()).collect())
    }

    fn features_matching(&self, tags: &[String], logic: TagLogic) -> Result<Vec<String>> {
        Ok(self
            .features
            .iter()
            .filter(|(_, feature_tags)| match logic {
                TagLogic::And => tags.iter().all(|t| feature_tags.contains(t)),
                TagLogic::Or => tags.iter().any(|t| feature_tags.contains(t)),
            })
            .map(|(n, _)| n.clone())
            .collect())
    }

    fn all_tags(&self) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self
            .features
            .iter()
            .flat_map(|(_, t)| t.iter().cloned())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}

/// Accepts every tag after normalisation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllTags;

impl TagValidator for AllowAllTags {
    fn validate(&self, requested: &[String]) -> Vec<String> {
        normalize_all(requested)
    }
}
