// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually starting the external test
//! runner with `tokio::process::Command` and turning its output into
//! something the orchestrator can use.
//!
//! - [`process`] is the process runner: merged output lines, liveness,
//!   forced kill and wait-for-exit.
//! - [`backend`] provides the `ProcessLauncher` trait and the production
//!   `TokioLauncher`, which tests can replace with a fake implementation.
//! - [`command`] resolves the runner binary and builds its arguments.
//! - [`parser`] extracts scenario/step counts and duration from output.

pub mod backend;
pub mod command;
pub mod parser;
pub mod process;

pub use backend::{CommandSpec, ProcessLauncher, TokioLauncher};
pub use command::{RunnerCommand, RunnerFilter, report_path, runner_args};
pub use parser::{CucumberSummaryParser, OutputParser, RunSummary};
pub use process::{ExitOutcome, ExitWatch, OutputLines, ProcessHandle, RunFailure, SpawnedProcess};
