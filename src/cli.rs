// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::engine::RunRequest;
use crate::types::TagLogic;

/// Command-line arguments for `bddrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "bddrun",
    version,
    about = "Run BDD test suites through an external runner and track every execution.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Bddrun.toml` in the current working directory. Built-in
    /// defaults apply when the default file does not exist.
    #[arg(long, global = true, value_name = "PATH", default_value = "Bddrun.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BDDRUN_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate and print what would run, but don't start the runner.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start a run, stream its progress and print the final record.
    Run(RunArgs),

    /// Show the record of a running or finished execution.
    Status {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// List recorded executions, newest first.
    History {
        /// Only executions that ran with this tag.
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Remove an execution from the history.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Check that the runner can be started.
    Check,

    /// Print a fresh execution id.
    NewId,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(subcommand)]
    pub target: RunTarget,

    /// Use this execution id instead of generating one.
    #[arg(long, global = true, value_name = "ID")]
    pub id: Option<String>,

    /// Override `runner.timeout_secs` for this run.
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum RunTarget {
    /// Every feature file.
    All,

    /// Specific feature files, by file name.
    Feature {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },

    /// Features selected by tags.
    Tags {
        #[arg(required = true, value_name = "TAG")]
        tags: Vec<String>,

        /// How to combine the tags.
        #[arg(long, value_enum, default_value_t = LogicArg::And)]
        logic: LogicArg,

        /// Tags to exclude. Recorded on the execution; makes this a
        /// complex-tag run, which always combines include tags with AND.
        #[arg(long = "exclude", value_name = "TAG")]
        exclude: Vec<String>,
    },
}

impl RunArgs {
    pub fn to_request(&self) -> RunRequest {
        let request = match &self.target {
            RunTarget::All => RunRequest::all(),
            RunTarget::Feature { names } => RunRequest::features(names.iter().cloned()),
            RunTarget::Tags {
                tags,
                logic,
                exclude,
            } => {
                if exclude.is_empty() {
                    RunRequest::tags(tags.iter().cloned(), (*logic).into())
                } else {
                    RunRequest::complex(tags.iter().cloned(), exclude.iter().cloned())
                }
            }
        };
        match &self.id {
            Some(id) => request.with_id(id.clone()),
            None => request,
        }
    }
}

/// Tag logic as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogicArg {
    And,
    Or,
}

impl From<LogicArg> for TagLogic {
    fn from(value: LogicArg) -> Self {
        match value {
            LogicArg::And => TagLogic::And,
            LogicArg::Or => TagLogic::Or,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
