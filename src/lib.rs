// src/lib.rs

pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod history;
pub mod logging;
pub mod progress;
pub mod record;
pub mod tags;
pub mod types;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::catalog::FsFeatureCatalog;
use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::{ConfigFile, load_or_default};
use crate::engine::{Collaborators, ExecutionRegistry, Orchestrator, Plan, RunSettings};
use crate::errors::BddrunError;
use crate::exec::{CucumberSummaryParser, TokioLauncher};
use crate::fs::{FileSystem, RealFileSystem};
use crate::history::{HistoryStore, JsonHistoryStore};
use crate::progress::{PROGRESS_ERROR, ProgressBroadcaster, ProgressEvent};
use crate::record::ExecutionRecord;
use crate::tags::KnownTags;
use crate::types::ExecutionStatus;

/// Production collaborators plus the orchestrator built on top of them.
#[derive(Clone)]
pub struct App {
    pub orchestrator: Orchestrator,
    pub history: Arc<dyn HistoryStore>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - feature catalog / tag catalog / history store
/// - orchestrator with the real process launcher
/// - Ctrl-C handling for `run`
pub async fn run(args: CliArgs) -> Result<ExitCode> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_or_default(&config_path)?;
    let root = config_root_dir(&config_path);

    if let Command::Run(RunArgs {
        timeout_secs: Some(secs),
        ..
    }) = &args.command
    {
        cfg.runner.timeout_secs = *secs;
    }

    let app = build_app(&cfg, &root)?;

    match &args.command {
        Command::Run(run_args) if args.dry_run => print_dry_run(&app, &cfg, run_args),
        Command::Run(run_args) => run_and_follow(&app, run_args).await,
        Command::Status { id } => {
            let record = app.orchestrator.status(id)?;
            print_json(&record)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::History { tag, limit } => {
            let records = match tag {
                Some(tag) => {
                    let mut records = app.history.by_tag(tag)?;
                    records.truncate(*limit);
                    records
                }
                None => app.history.recent(*limit)?,
            };
            print_json(&records)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { id } => {
            if !app.history.delete(id)? {
                return Err(BddrunError::ExecutionNotFound(id.clone()).into());
            }
            println!("deleted {id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let runner = &app.orchestrator.settings().runner;
            println!("runner: {}", runner.program());
            println!("working dir: {}", runner.working_dir().display());
            if runner.is_available().await {
                println!("status: available");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("status: not available");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::NewId => {
            println!("{}", app.orchestrator.next_id());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build the production object graph for `cfg`.
pub fn build_app(cfg: &ConfigFile, config_root: &Path) -> Result<App> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let features_dir = cfg.features_dir(config_root);
    let catalog = Arc::new(FsFeatureCatalog::new(Arc::clone(&fs), &features_dir));
    let known_tags = KnownTags::load(fs.as_ref(), &cfg.tags_file(config_root), catalog.as_ref())?;
    debug!(
        features_dir = %features_dir.display(),
        active_tags = known_tags.len(),
        "catalogs loaded"
    );

    let history: Arc<dyn HistoryStore> = Arc::new(JsonHistoryStore::new(
        Arc::clone(&fs),
        cfg.history_file(config_root),
    ));

    let broadcaster = Arc::new(ProgressBroadcaster::new(cfg.progress.channel_capacity));
    let registry = Arc::new(ExecutionRegistry::new(Arc::clone(&broadcaster)));

    let collaborators = Collaborators {
        launcher: Arc::new(TokioLauncher),
        catalog,
        tags: Arc::new(known_tags),
        history: Arc::clone(&history),
        parser: Arc::new(CucumberSummaryParser::new()?),
        fs,
    };

    let settings = RunSettings::from_config(cfg, config_root);
    info!(runner = %settings.runner.program(), "orchestrator ready");

    Ok(App {
        orchestrator: Orchestrator::new(settings, collaborators, registry, broadcaster),
        history,
    })
}

/// Start a run, print its progress until it is terminal, then print the
/// record. Ctrl-C cancels the run.
async fn run_and_follow(app: &App, run_args: &RunArgs) -> Result<ExitCode> {
    let orchestrator = &app.orchestrator;

    let mut request = run_args.to_request();
    if request.execution_id.is_none() {
        request = request.with_id(orchestrator.next_id());
    }
    let execution_id = request.execution_id.clone().unwrap_or_default();

    // Subscribe before starting so the first events are not missed.
    let mut progress = orchestrator.broadcaster().subscribe_to(&execution_id);
    let ticket = orchestrator.start(request)?;

    let wait = ticket.wait();
    tokio::pin!(wait);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut progress_open = true;

    let record = loop {
        tokio::select! {
            event = progress.recv(), if progress_open => match event {
                Some(event) => print_event(&event),
                None => progress_open = false,
            },
            record = &mut wait => break record?,
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match signal {
                    Ok(()) => {
                        info!(execution_id = %execution_id, "Ctrl-C received; cancelling execution");
                        orchestrator.cancel(&execution_id).await;
                    }
                    Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
                }
            }
        }
    };

    while let Some(event) = progress.try_recv() {
        print_event(&event);
    }

    print_json(&record)?;
    Ok(exit_code_for(&record))
}

fn exit_code_for(record: &ExecutionRecord) -> ExitCode {
    match record.status() {
        ExecutionStatus::Passed | ExecutionStatus::Skipped => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn print_event(event: &ProgressEvent) {
    if event.progress == PROGRESS_ERROR {
        println!("[ err] {}", event.message);
    } else {
        println!("[{:>3}%] {}", event.progress, event.message);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Figure out the directory relative paths in the config are resolved from.
///
/// - If the config path has a non-empty parent (e.g. "ci/Bddrun.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Bddrun.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Dry-run output: resolved settings, the plan and the runner command line.
fn print_dry_run(app: &App, cfg: &ConfigFile, run_args: &RunArgs) -> Result<ExitCode> {
    let orchestrator = &app.orchestrator;
    let settings = orchestrator.settings();
    let request = run_args.to_request();

    println!("bddrun dry-run");
    println!("  runner = {}", settings.runner.program());
    println!("  working_dir = {}", settings.runner.working_dir().display());
    println!("  features_dir = {}", settings.features_dir.display());
    println!("  reports_dir = {}", settings.reports_dir.display());
    println!("  timeout_secs = {}", cfg.runner.timeout_secs);
    println!();

    let plan = orchestrator.plan(&request)?;
    let selection = plan.selection();
    println!("execution type: {}", selection.execution_type);
    if !selection.tags.is_empty() {
        println!("tags: {:?}", selection.tags);
    }
    if !selection.exclude_tags.is_empty() {
        println!("exclude tags (not applied): {:?}", selection.exclude_tags);
    }
    if !selection.feature_files.is_empty() {
        println!("features ({}):", selection.feature_files.len());
        for feature in &selection.feature_files {
            println!("  - {feature}");
        }
    }

    match &plan {
        Plan::Skip { note, .. } => println!("would skip: {note}"),
        Plan::Launch(selection) => {
            let id = request
                .execution_id
                .clone()
                .unwrap_or_else(|| orchestrator.next_id());
            println!("command: {}", orchestrator.command_for(&id, selection));
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(ExitCode::SUCCESS)
}
