// src/exec/backend.rs

//! Pluggable launcher abstraction.
//!
//! The orchestrator asks a `ProcessLauncher` to start the runner instead of
//! building a `tokio::process::Command` itself. This makes it easy to swap
//! in a scripted launcher in tests while keeping the production launcher
//! here.
//!
//! - [`TokioLauncher`] is the default implementation used by `bddrun`. It
//!   starts `spec.program` directly (no shell) in `spec.working_dir`.
//! - Tests can provide their own launcher that, for example, records which
//!   command lines were requested and runs a short shell script instead.

use std::fmt;
use std::path::PathBuf;

use tokio::process::Command;

use crate::errors::Result;

use super::process::{self, SpawnedProcess};

/// Fully resolved command line for one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
        }
    }

    /// Value of the first `-D<key>=` argument, if any.
    pub fn property(&self, key: &str) -> Option<&str> {
        let prefix = format!("-D{key}=");
        self.args
            .iter()
            .find_map(|a| a.strip_prefix(prefix.as_str()))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Trait abstracting how the runner process is started.
///
/// Production code uses [`TokioLauncher`]; tests can provide their own
/// implementation. Called from within a Tokio runtime.
pub trait ProcessLauncher: Send + Sync {
    /// Start the process described by `spec`.
    ///
    /// Fails with `BddrunError::LaunchError` if it cannot be started at all.
    fn launch(&self, spec: &CommandSpec) -> Result<SpawnedProcess>;
}

/// Real launcher used in production.
#[derive(Debug, Clone, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).current_dir(&spec.working_dir);
        process::spawn(cmd, &spec.program)
    }
}
