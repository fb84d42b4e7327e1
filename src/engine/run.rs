// src/engine/run.rs

//! The per-run task.
//!
//! One task owns the output stream and the in-memory record of a run. While
//! the process is alive it is flanked by a heartbeat task and a watchdog
//! task; both are stopped through a shared `CancellationToken` and joined
//! before the run is finalised, so neither outlives the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::exec::{ExitOutcome, ExitWatch, OutputLines};
use crate::progress::{PROGRESS_DONE, PROGRESS_ERROR, ProgressBroadcaster};
use crate::record::{ExecutionRecord, UNKNOWN_DURATION};
use crate::types::{ExecutionStatus, ExecutionType};

use super::orchestrator::Shared;
use super::registry::{ExecutionRegistry, Termination, TerminationFlag};

pub const HEARTBEAT_MESSAGE: &str = "Execution in progress...";
pub const HEARTBEAT_PROGRESS: i32 = 40;
pub const TIMED_OUT_MESSAGE: &str = "Execution timed out";
pub const PROCESSING_MESSAGE: &str = "Processing results...";
pub const COMPLETED_MESSAGE: &str = "Execution completed!";
pub const NO_SCENARIOS_NOTE: &str = "No scenarios executed";

/// Scenario-driven progress starts here and never passes the cap.
const SCENARIO_PROGRESS_START: i32 = 30;
const SCENARIO_PROGRESS_CAP: i32 = 90;
const BUILD_SUCCESS_PROGRESS: i32 = 95;
const PROCESSING_PROGRESS: i32 = 95;
const MISSING_REPORT_PROGRESS: i32 = 99;

/// Everything the run task takes over from `Orchestrator::start`.
#[derive(Debug)]
pub(crate) struct RunContext {
    pub(crate) record: ExecutionRecord,
    pub(crate) report: PathBuf,
    pub(crate) output: OutputLines,
    pub(crate) exit: ExitWatch,
    pub(crate) flag: Arc<TerminationFlag>,
}

/// Drive a launched run to its final record.
///
/// Errors and panics inside the run are caught here and turned into a
/// best-effort `FAILED` record, so nothing escapes to the caller's runtime.
pub(crate) async fn supervise(shared: Arc<Shared>, ctx: RunContext) -> ExecutionRecord {
    let template = ctx.record.clone();
    let failure = match tokio::spawn(drive(Arc::clone(&shared), ctx)).await {
        Ok(Ok(record)) => return record,
        Ok(Err(e)) => e.to_string(),
        Err(join_err) => format!("run task aborted: {join_err}"),
    };
    error!(
        execution_id = %template.execution_id(),
        error = %failure,
        "execution failed unexpectedly"
    );
    recover(&shared, template, failure).await
}

/// Persist and announce a run that was skipped before launch.
pub(crate) async fn finish_skipped(
    shared: Arc<Shared>,
    mut record: ExecutionRecord,
    message: String,
) -> ExecutionRecord {
    let id = record.execution_id().to_string();
    if let Err(e) = persist(&shared, &record).await {
        error!(execution_id = %id, error = %e, "failed to record skipped execution");
        record.add_note(format!("History append failed: {e}"));
    }
    shared.registry.release(&id);
    shared.broadcaster.publish(&id, message, PROGRESS_DONE);
    info!(execution_id = %id, notes = ?record.notes, "execution skipped");
    record
}

async fn drive(shared: Arc<Shared>, ctx: RunContext) -> Result<ExecutionRecord> {
    let RunContext {
        mut record,
        report,
        mut output,
        exit,
        flag,
    } = ctx;
    let id = record.execution_id().to_string();
    let settings = &shared.settings;
    let broadcaster = &shared.broadcaster;

    let stop = CancellationToken::new();
    let heartbeat = tokio::spawn(heartbeat(
        Arc::clone(broadcaster),
        id.clone(),
        exit.clone(),
        settings.heartbeat,
        stop.clone(),
    ));
    let watchdog = tokio::spawn(watchdog(
        Arc::clone(&shared.registry),
        Arc::clone(broadcaster),
        id.clone(),
        exit.clone(),
        settings.timeout,
        stop.clone(),
    ));

    let captured = consume_output(
        broadcaster,
        &id,
        record.execution_type,
        &mut output,
        &exit,
        &flag,
        settings.output_grace,
    )
    .await;

    stop.cancel();
    for (name, task) in [("heartbeat", heartbeat), ("watchdog", watchdog)] {
        if let Err(e) = task.await {
            warn!(execution_id = %id, task = name, error = %e, "helper task did not finish cleanly");
        }
    }

    let outcome = exit.wait().await;
    shared.registry.complete(&id);
    let termination = flag.get().unwrap_or(Termination::Completed);
    info!(execution_id = %id, exit_code = ?outcome.and_then(|o| o.code), ?termination, "runner finished");

    broadcaster.publish(&id, PROCESSING_MESSAGE, PROCESSING_PROGRESS);

    let summary = shared.collab.parser.summarize(&captured);
    record.set_scenarios(summary.scenarios);
    record.set_steps(summary.steps);
    record.duration = summary.duration.unwrap_or_else(|| UNKNOWN_DURATION.to_string());

    let (status, note) = resolve_status(termination, outcome, settings.timeout);
    if let Some(note) = note {
        record.add_note(note);
    }

    if shared.collab.fs.is_file(&report) {
        record.report_path = Some(report);
    } else {
        warn!(execution_id = %id, report = %report.display(), "expected report not found");
        let message = format!("Report not generated: {}", report.display());
        broadcaster.publish(&id, message.as_str(), MISSING_REPORT_PROGRESS);
        record.add_note(message);
    }

    let status = if matches!(status, ExecutionStatus::Passed | ExecutionStatus::Failed)
        && record.total_scenarios == 0
    {
        record.add_note(NO_SCENARIOS_NOTE);
        ExecutionStatus::Skipped
    } else {
        status
    };
    record.transition(status)?;

    shared.registry.stage(record.clone());
    if let Err(e) = persist(&shared, &record).await {
        error!(execution_id = %id, error = %e, "failed to record execution");
        record.add_note(format!("History append failed: {e}"));
    }
    shared.registry.release(&id);

    let (message, progress) = final_event(&record);
    broadcaster.publish(&id, message, progress);
    info!(
        execution_id = %id,
        status = %record.status(),
        scenarios = record.total_scenarios,
        duration = %record.duration,
        "execution finished"
    );
    Ok(record)
}

/// Terminal status from who ended the run and how the process exited.
fn resolve_status(
    termination: Termination,
    outcome: Option<ExitOutcome>,
    timeout: Duration,
) -> (ExecutionStatus, Option<String>) {
    match termination {
        Termination::Cancelled => (
            ExecutionStatus::Cancelled,
            Some(super::registry::CANCELLED_MESSAGE.to_string()),
        ),
        Termination::TimedOut => (
            ExecutionStatus::Timeout,
            Some(format!(
                "{TIMED_OUT_MESSAGE} after {}s",
                timeout.as_secs_f64()
            )),
        ),
        Termination::Aborted => (ExecutionStatus::Failed, None),
        Termination::Completed => match outcome {
            Some(outcome) => match outcome.check() {
                Ok(()) => (ExecutionStatus::Passed, None),
                Err(failure) => (ExecutionStatus::Failed, Some(capitalize(&failure.to_string()))),
            },
            None => (
                ExecutionStatus::Failed,
                Some("Runner exit status unavailable".to_string()),
            ),
        },
    }
}

fn final_event(record: &ExecutionRecord) -> (String, i32) {
    let message = match record.status() {
        ExecutionStatus::Passed | ExecutionStatus::Skipped => COMPLETED_MESSAGE.to_string(),
        ExecutionStatus::Timeout => TIMED_OUT_MESSAGE.to_string(),
        ExecutionStatus::Cancelled => "Execution cancelled".to_string(),
        other => format!("Execution finished with status {other}"),
    };
    (message, record.status().final_progress())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Read output to end-of-stream, publishing scenario and build progress.
///
/// Once the process has exited, output is drained for at most `grace`;
/// a forked grandchild holding the pipes open cannot stall the run. The
/// exit itself claims `flag` as completed, so a late cancel cannot
/// relabel a run that already ended.
async fn consume_output(
    broadcaster: &ProgressBroadcaster,
    execution_id: &str,
    execution_type: ExecutionType,
    output: &mut OutputLines,
    exit: &ExitWatch,
    flag: &TerminationFlag,
    grace: Duration,
) -> String {
    let step = execution_type.scenario_progress_step();
    let mut estimate = SCENARIO_PROGRESS_START;
    let mut captured = String::new();

    let exited = exit.wait();
    tokio::pin!(exited);
    let mut drain_deadline: Option<Instant> = None;

    loop {
        let deadline = drain_deadline;
        let grace_elapsed = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            line = output.next_line() => {
                let Some(line) = line else {
                    break;
                };
                debug!(execution_id, "{}", line);

                if line.contains("Scenario:") {
                    estimate = (estimate + step).min(SCENARIO_PROGRESS_CAP);
                    broadcaster.publish(execution_id, format!("Running: {}", line.trim()), estimate);
                } else if line.contains("BUILD SUCCESS") {
                    estimate = BUILD_SUCCESS_PROGRESS;
                    broadcaster.publish(execution_id, "Build succeeded", estimate);
                } else if line.contains("BUILD FAILURE") {
                    // The estimate is left as is; later scenarios keep counting from it.
                    broadcaster.publish(execution_id, "Build failed", PROGRESS_ERROR);
                }

                captured.push_str(&line);
                captured.push('\n');
            }

            _ = &mut exited, if drain_deadline.is_none() => {
                flag.claim(Termination::Completed);
                drain_deadline = Some(Instant::now() + grace);
            }

            _ = grace_elapsed => {
                warn!(execution_id, ?grace, "output still open after process exit; stopped reading");
                break;
            }
        }
    }

    captured
}

/// Republish "in progress" every `every` while the process is alive.
async fn heartbeat(
    broadcaster: Arc<ProgressBroadcaster>,
    execution_id: String,
    exit: ExitWatch,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if !exit.is_alive() {
                    break;
                }
                broadcaster.publish(&execution_id, HEARTBEAT_MESSAGE, HEARTBEAT_PROGRESS);
            }
        }
    }
    debug!(execution_id = %execution_id, "heartbeat stopped");
}

/// Kill the run once `timeout` has passed, unless it ended first.
async fn watchdog(
    registry: Arc<ExecutionRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    execution_id: String,
    exit: ExitWatch,
    timeout: Duration,
    stop: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = stop.cancelled() => {}
        _ = exit.wait() => {}
        _ = tokio::time::sleep(timeout) => {
            if exit.is_alive() && registry.terminate(&execution_id, Termination::TimedOut).await {
                warn!(execution_id = %execution_id, ?timeout, "execution exceeded timeout; process killed");
                broadcaster.publish(&execution_id, TIMED_OUT_MESSAGE, PROGRESS_ERROR);
            }
        }
    }
    debug!(execution_id = %execution_id, "watchdog stopped");
}

/// Append `record` to history without blocking the runtime.
async fn persist(shared: &Shared, record: &ExecutionRecord) -> Result<()> {
    let history = Arc::clone(&shared.collab.history);
    let record = record.clone();
    tokio::task::spawn_blocking(move || history.append(&record))
        .await
        .map_err(|e| anyhow::anyhow!("history append task failed: {e}"))?
}

/// Best-effort cleanup and `FAILED` record after an unexpected error.
async fn recover(shared: &Shared, mut record: ExecutionRecord, failure: String) -> ExecutionRecord {
    let id = record.execution_id().to_string();

    shared.registry.terminate(&id, Termination::Aborted).await;

    if let Err(e) = record.transition(ExecutionStatus::Failed) {
        warn!(execution_id = %id, error = %e, "could not mark record failed");
    }
    record.add_note(format!("Execution failed: {failure}"));

    shared.registry.stage(record.clone());
    if let Err(e) = persist(shared, &record).await {
        error!(execution_id = %id, error = %e, "failed to record failed execution");
    }
    shared.registry.release(&id);
    shared
        .broadcaster
        .publish(&id, format!("Execution failed: {failure}"), PROGRESS_ERROR);
    record
}
