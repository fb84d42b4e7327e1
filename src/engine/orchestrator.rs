// src/engine/orchestrator.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::FeatureCatalog;
use crate::config::ConfigFile;
use crate::errors::{BddrunError, Result};
use crate::exec::{CommandSpec, OutputParser, ProcessLauncher, RunnerCommand, report_path, runner_args};
use crate::fs::FileSystem;
use crate::history::HistoryStore;
use crate::progress::{PROGRESS_ERROR, ProgressBroadcaster};
use crate::record::ExecutionRecord;
use crate::tags::TagValidator;
use crate::types::ExecutionStatus;

use super::ids::ExecutionIdGenerator;
use super::plan::{self, Plan, RunRequest, Selection};
use super::registry::{ExecutionRegistry, TerminationFlag};
use super::run::{self, RunContext};

pub const PREPARING_MESSAGE: &str = "Preparing test execution...";
pub const EXECUTING_MESSAGE: &str = "Executing tests...";

/// Runner-related settings for every run started by one orchestrator.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub runner: RunnerCommand,
    pub features_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub timeout: Duration,
    pub heartbeat: Duration,
    /// How long to keep reading output once the process has exited.
    pub output_grace: Duration,
}

impl RunSettings {
    pub fn from_config(config: &ConfigFile, config_root: &Path) -> Self {
        Self {
            runner: RunnerCommand::resolve(config, config_root),
            features_dir: config.features_dir(config_root),
            reports_dir: config.reports_dir(config_root),
            timeout: config.timeout(),
            heartbeat: config.heartbeat(),
            output_grace: config.output_grace(),
        }
    }
}

/// External collaborators the orchestrator depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub catalog: Arc<dyn FeatureCatalog>,
    pub tags: Arc<dyn TagValidator>,
    pub history: Arc<dyn HistoryStore>,
    pub parser: Arc<dyn OutputParser>,
    /// Used to look for the generated report.
    pub fs: Arc<dyn FileSystem>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("fs", &self.fs)
            .finish_non_exhaustive()
    }
}

/// State shared between the orchestrator handle and its run tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) settings: RunSettings,
    pub(crate) collab: Collaborators,
    pub(crate) registry: Arc<ExecutionRegistry>,
    pub(crate) broadcaster: Arc<ProgressBroadcaster>,
    ids: ExecutionIdGenerator,
}

/// Accepted run: its id and a handle on its final record.
#[derive(Debug)]
pub struct RunTicket {
    execution_id: String,
    completion: JoinHandle<ExecutionRecord>,
}

impl RunTicket {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<ExecutionRecord> {
        self.completion.await.map_err(|e| {
            BddrunError::Other(anyhow::anyhow!(
                "run task for {} did not complete: {e}",
                self.execution_id
            ))
        })
    }
}

/// Entry point for starting, cancelling and inspecting runs.
///
/// Cheap to clone; clones share the registry and broadcaster. Every run is
/// driven by its own task, so concurrent runs never wait on each other.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        settings: RunSettings,
        collaborators: Collaborators,
        registry: Arc<ExecutionRegistry>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                collab: collaborators,
                registry,
                broadcaster,
                ids: ExecutionIdGenerator::new(),
            }),
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.shared.settings
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.shared.registry
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.shared.broadcaster
    }

    pub fn next_id(&self) -> String {
        self.shared.ids.next_id()
    }

    /// Validate `request` and decide what would run, without side effects.
    pub fn plan(&self, request: &RunRequest) -> Result<Plan> {
        plan::plan(
            request,
            self.shared.collab.catalog.as_ref(),
            self.shared.collab.tags.as_ref(),
        )
    }

    /// Runner command line for `selection` under `execution_id`.
    pub fn command_for(&self, execution_id: &str, selection: &Selection) -> CommandSpec {
        let settings = &self.shared.settings;
        let report = report_path(&settings.reports_dir, execution_id);
        settings
            .runner
            .spec(runner_args(&selection.filter, &report, &settings.features_dir))
    }

    /// Accept a run and return as soon as it is under way.
    ///
    /// Validation and launch failures are returned synchronously, before
    /// any record exists, and give the claimed id back. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self, request: RunRequest) -> Result<RunTicket> {
        let execution_id = self.claim_id(request.execution_id.as_deref())?;
        self.start_claimed(execution_id.clone(), &request)
            .inspect_err(|_| self.shared.registry.release(&execution_id))
    }

    fn start_claimed(&self, execution_id: String, request: &RunRequest) -> Result<RunTicket> {
        let plan = self.plan(request)?;
        let broadcaster = &self.shared.broadcaster;

        info!(
            execution_id = %execution_id,
            execution_type = %request.execution_type,
            "execution accepted"
        );
        broadcaster.publish(&execution_id, PREPARING_MESSAGE, 0);

        let (selection, completion) = match plan {
            Plan::Skip {
                selection,
                note,
                message,
            } => {
                let mut record = ExecutionRecord::new(&execution_id, selection.execution_type);
                selection.apply_to(&mut record);
                record.transition(ExecutionStatus::Skipped)?;
                record.add_note(note);
                self.shared.registry.stage(record.clone());

                let shared = Arc::clone(&self.shared);
                let completion = tokio::spawn(run::finish_skipped(shared, record, message));
                (selection, completion)
            }
            Plan::Launch(selection) => {
                let completion = self.launch(&execution_id, &selection)?;
                (selection, completion)
            }
        };

        debug!(execution_id = %execution_id, features = ?selection.feature_files, "run dispatched");
        Ok(RunTicket {
            execution_id,
            completion,
        })
    }

    fn launch(
        &self,
        execution_id: &str,
        selection: &Selection,
    ) -> Result<JoinHandle<ExecutionRecord>> {
        let shared = &self.shared;
        let broadcaster = &shared.broadcaster;

        if let Some(found) = selection.matched_features() {
            broadcaster.publish(
                execution_id,
                format!("Found {found} features to execute"),
                10,
            );
        }

        let spec = self.command_for(execution_id, selection);
        info!(execution_id, command = %spec, "launching runner");

        let spawned = match shared.collab.launcher.launch(&spec) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(execution_id, error = %e, "runner could not be started");
                broadcaster.publish(
                    execution_id,
                    format!("Failed to start runner: {e}"),
                    PROGRESS_ERROR,
                );
                return Err(e);
            }
        };

        let mut record = ExecutionRecord::new(execution_id, selection.execution_type);
        selection.apply_to(&mut record);
        record.transition(ExecutionStatus::Running)?;

        let flag = Arc::new(TerminationFlag::new());
        shared
            .registry
            .register(record.clone(), spawned.handle, Arc::clone(&flag))?;

        broadcaster.publish(execution_id, EXECUTING_MESSAGE, 20);

        let ctx = RunContext {
            record,
            report: report_path(&shared.settings.reports_dir, execution_id),
            output: spawned.output,
            exit: spawned.exit,
            flag,
        };
        Ok(tokio::spawn(run::supervise(Arc::clone(shared), ctx)))
    }

    /// Cancel a running execution. `false` if it is not running.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        self.shared.registry.cancel(execution_id).await
    }

    /// In-memory record until the run is persisted, then the stored one.
    pub fn status(&self, execution_id: &str) -> Result<ExecutionRecord> {
        if let Some(record) = self.shared.registry.record(execution_id) {
            return Ok(record);
        }
        self.shared
            .collab
            .history
            .get(execution_id)?
            .ok_or_else(|| BddrunError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Reserve the caller's id if it is free, otherwise a generated one.
    fn claim_id(&self, requested: Option<&str>) -> Result<String> {
        if let Some(id) = requested.map(str::trim).filter(|id| !id.is_empty()) {
            if !self.reserve_unused(id)? {
                return Err(BddrunError::validation(format!(
                    "Execution id already in use: {id}"
                )));
            }
            return Ok(id.to_string());
        }

        loop {
            let id = self.next_id();
            if self.reserve_unused(&id)? {
                return Ok(id);
            }
            debug!(execution_id = %id, "generated id already in use; drawing another");
        }
    }

    /// Reserve `id` in the registry unless it is taken there or in history.
    fn reserve_unused(&self, id: &str) -> Result<bool> {
        let registry = &self.shared.registry;
        if !registry.reserve(id) {
            return Ok(false);
        }
        match self.shared.collab.history.contains(id) {
            Ok(false) => Ok(true),
            Ok(true) => {
                registry.release(id);
                Ok(false)
            }
            Err(e) => {
                registry.release(id);
                Err(e)
            }
        }
    }
}
