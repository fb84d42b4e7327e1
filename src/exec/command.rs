// src/exec/command.rs

//! Runner resolution and argument building.
//!
//! The runner is Maven driving Cucumber: selection and report location are
//! passed as `-Dcucumber.*` system properties.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;

use super::backend::CommandSpec;

/// How long the availability check may take.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

const WRAPPER_UNIX: &str = "mvnw";
const WRAPPER_WINDOWS: &str = "mvnw.cmd";

/// Which features a run hands to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerFilter {
    /// Whole suite, from a clean build.
    All,
    /// Explicit feature files, relative to the features directory.
    Features(Vec<String>),
    /// A cucumber tag expression such as `@smoke and @login`.
    Tags(String),
}

/// Path of the HTML report the runner is asked to write for `execution_id`.
pub fn report_path(reports_dir: &Path, execution_id: &str) -> PathBuf {
    reports_dir.join(format!("cucumber-report-{execution_id}.html"))
}

/// Maven arguments for one run.
pub fn runner_args(filter: &RunnerFilter, report: &Path, features_dir: &Path) -> Vec<String> {
    let plugin = format!("-Dcucumber.plugin=html:{}", report.display());

    match filter {
        RunnerFilter::All => vec!["clean".to_string(), "test".to_string(), plugin],
        RunnerFilter::Features(features) => {
            let paths: Vec<String> = features
                .iter()
                .map(|f| features_dir.join(f).display().to_string())
                .collect();
            vec![
                "test".to_string(),
                format!("-Dcucumber.features={}", paths.join(",")),
                plugin,
            ]
        }
        RunnerFilter::Tags(expression) => vec![
            "test".to_string(),
            format!("-Dcucumber.filter.tags={expression}"),
            plugin,
        ],
    }
}

/// The runner executable and the directory it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    program: String,
    working_dir: PathBuf,
}

impl RunnerCommand {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
        }
    }

    /// Pick the runner for `config`.
    ///
    /// Order: project wrapper in the working dir (if `prefer_wrapper`), then
    /// `$MAVEN_HOME/bin/mvn` or `$M2_HOME/bin/mvn` when the configured
    /// command is the plain default, then the configured command itself
    /// (looked up on `PATH` at launch).
    pub fn resolve(config: &ConfigFile, config_root: &Path) -> Self {
        let working_dir = config.working_dir(config_root);

        if config.runner.prefer_wrapper {
            if let Some(wrapper) = find_wrapper(&working_dir) {
                debug!(wrapper = %wrapper.display(), "using project runner wrapper");
                return Self::new(wrapper.display().to_string(), working_dir);
            }
        }

        if config.runner.command == "mvn" {
            for var in ["MAVEN_HOME", "M2_HOME"] {
                if let Some(mvn) = maven_home_binary(std::env::var_os(var).map(PathBuf::from)) {
                    debug!(env = var, mvn = %mvn.display(), "using maven from environment");
                    return Self::new(mvn.display().to_string(), working_dir);
                }
            }
        }

        Self::new(config.runner.command.clone(), working_dir)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn spec(&self, args: Vec<String>) -> CommandSpec {
        CommandSpec::new(self.program.clone(), args, self.working_dir.clone())
    }

    /// Run `<program> -v` and report whether it exits 0 within
    /// [`CHECK_TIMEOUT`].
    pub async fn is_available(&self) -> bool {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-v")
            .current_dir(&self.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, error = %e, "runner not found");
                return false;
            }
        };

        match tokio::time::timeout(CHECK_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                info!(program = %self.program, "runner available");
                true
            }
            Ok(Ok(status)) => {
                warn!(program = %self.program, exit_code = ?status.code(), "runner check exited non-zero");
                false
            }
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "failed to wait for runner check");
                false
            }
            Err(_) => {
                warn!(program = %self.program, timeout = ?CHECK_TIMEOUT, "runner check timed out");
                false
            }
        }
    }
}

fn find_wrapper(dir: &Path) -> Option<PathBuf> {
    let name = if cfg!(windows) {
        WRAPPER_WINDOWS
    } else {
        WRAPPER_UNIX
    };
    let candidate = dir.join(name);
    is_executable(&candidate).then_some(candidate)
}

fn maven_home_binary(home: Option<PathBuf>) -> Option<PathBuf> {
    let home = home.filter(|h| !h.as_os_str().is_empty())?;
    let name = if cfg!(windows) { "mvn.cmd" } else { "mvn" };
    let candidate = home.join("bin").join(name);
    candidate.is_file().then_some(candidate)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
