// src/exec/process.rs

//! Process runner: start an external command and split it into three
//! independently owned pieces.
//!
//! - [`ProcessHandle`] controls the process (forced kill, liveness). It is
//!   meant to be moved into the execution registry.
//! - [`OutputLines`] yields merged stdout/stderr line by line until
//!   end-of-stream. The task consuming output owns it.
//! - [`ExitWatch`] observes the exit status. It is cheap to clone, so the
//!   heartbeat and watchdog tasks each get their own.
//!
//! The `Child` itself lives in a reaper task which waits for the process and
//! services kill requests, so killing never contends with waiting.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::errors::{BddrunError, Result};

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// How a runner process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code; `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// `Ok` on exit code 0, otherwise the failure with its code.
    pub fn check(&self) -> std::result::Result<(), RunFailure> {
        if self.success() {
            Ok(())
        } else {
            Err(match self.code {
                Some(code) => RunFailure::ExitCode(code),
                None => RunFailure::Signalled,
            })
        }
    }

    fn from_status(status: &ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// The runner started but did not exit cleanly.
///
/// Not a [`BddrunError`]: a failed run still produces a `FAILED` record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFailure {
    #[error("runner exited with code {0}")]
    ExitCode(i32),
    #[error("runner was terminated by a signal")]
    Signalled,
}

/// A freshly started process, split into its owned parts.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub output: OutputLines,
    pub exit: ExitWatch,
}

/// Control side of a running process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: mpsc::Sender<oneshot::Sender<()>>,
    exit: ExitWatch,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.exit.is_alive()
    }

    /// Forcefully terminate the process and wait until it has been reaped.
    ///
    /// Idempotent: killing an already-exited process is a no-op. Callable
    /// from any task.
    pub async fn kill(&self) {
        if !self.is_alive() {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.kill_tx.send(ack_tx).await.is_err() {
            // Reaper finished between the liveness check and the send.
            return;
        }
        let _ = ack_rx.await;
    }

    /// Wait for exit, optionally bounded by `timeout`.
    pub async fn wait(&self, timeout: Option<Duration>) -> Option<ExitOutcome> {
        match timeout {
            Some(limit) => self.exit.wait_timeout(limit).await,
            None => self.exit.wait().await,
        }
    }
}

/// Observer of a process' exit.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ExitOutcome>>,
}

impl ExitWatch {
    pub fn is_alive(&self) -> bool {
        self.rx.borrow().is_none()
    }

    /// Exit outcome if the process has already been reaped.
    pub fn current(&self) -> Option<ExitOutcome> {
        *self.rx.borrow()
    }

    /// Wait for the process to exit.
    ///
    /// Returns `None` only if the reaper went away without recording an exit.
    pub async fn wait(&self) -> Option<ExitOutcome> {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => *outcome,
            Err(_) => None,
        }
    }

    /// Wait at most `limit`; `None` if the process is still running then.
    pub async fn wait_timeout(&self, limit: Duration) -> Option<ExitOutcome> {
        tokio::time::timeout(limit, self.wait()).await.ok().flatten()
    }
}

/// Merged stdout/stderr of a process, one line at a time.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::Receiver<String>,
}

impl OutputLines {
    /// Next output line, or `None` at end-of-stream on both pipes.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Spawn `cmd` with piped, merged output and start its reaper task.
///
/// Must be called from within a Tokio runtime. `label` is used in logs and
/// in the launch error.
pub fn spawn(mut cmd: Command, label: &str) -> Result<SpawnedProcess> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| BddrunError::LaunchError {
        command: label.to_string(),
        source,
    })?;

    let pid = child.id();
    info!(command = %label, ?pid, "runner process started");

    let (line_tx, line_rx) = mpsc::channel::<String>(OUTPUT_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        spawn_line_pump(stdout, line_tx.clone(), "stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_pump(stderr, line_tx.clone(), "stderr");
    }
    // The pumps hold the only senders now; the channel closes when both end.
    drop(line_tx);

    let (exit_tx, exit_rx) = watch::channel::<Option<ExitOutcome>>(None);
    let (kill_tx, kill_rx) = mpsc::channel::<oneshot::Sender<()>>(4);
    tokio::spawn(reap(child, kill_rx, exit_tx, label.to_string()));

    let exit = ExitWatch { rx: exit_rx };
    Ok(SpawnedProcess {
        handle: ProcessHandle {
            pid,
            kill_tx,
            exit: exit.clone(),
        },
        output: OutputLines { rx: line_rx },
        exit,
    })
}

fn spawn_line_pump<R>(pipe: R, tx: mpsc::Sender<String>, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        // Consumer went away; keep draining so the pipe never fills.
                        while let Ok(Some(_)) = lines.next_line().await {}
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(stream, error = %e, "error reading runner output; closing stream");
                    break;
                }
            }
        }
        debug!(stream, "output pump finished");
    });
}

/// Own the child: wait for it, or kill it on request, then publish the exit.
async fn reap(
    mut child: Child,
    mut kill_rx: mpsc::Receiver<oneshot::Sender<()>>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    label: String,
) {
    let mut pending_acks = Vec::new();

    let status = tokio::select! {
        status = child.wait() => status,
        Some(ack) = kill_rx.recv() => {
            info!(command = %label, "forced termination requested; killing process");
            if let Err(e) = child.start_kill() {
                warn!(command = %label, error = %e, "failed to signal process");
            }
            pending_acks.push(ack);
            child.wait().await
        }
    };

    let outcome = match status {
        Ok(status) => ExitOutcome::from_status(&status),
        Err(e) => {
            warn!(command = %label, error = %e, "failed to wait for process");
            ExitOutcome { code: None }
        }
    };
    info!(command = %label, exit_code = ?outcome.code, "runner process exited");

    let _ = exit_tx.send(Some(outcome));

    // Anyone who asked for a kill gets released once the exit is visible.
    while let Ok(ack) = kill_rx.try_recv() {
        pending_acks.push(ack);
    }
    for ack in pending_acks {
        let _ = ack.send(());
    }
}
