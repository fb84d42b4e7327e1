// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [runner]
/// command = "mvn"
/// timeout_secs = 900
///
/// [paths]
/// features_dir = "src/test/resources/features"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub runner: RunnerSection,

    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub progress: ProgressSection,
}

/// `[runner]` section: how the external test runner is started and policed.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSection {
    /// Runner binary used when no project-local wrapper is found.
    #[serde(default = "default_command")]
    pub command: String,

    /// Prefer `./mvnw` (or `mvnw.cmd`) in `working_dir` over `command`.
    #[serde(default = "default_true")]
    pub prefer_wrapper: bool,

    /// Directory the runner is started in. Relative paths are resolved
    /// against the directory holding the config file.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Watchdog timeout for one run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between "in progress" heartbeats.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// How long output is still drained after the process has exited.
    #[serde(default = "default_output_grace_ms")]
    pub output_grace_ms: u64,
}

fn default_command() -> String {
    "mvn".to_string()
}

fn default_true() -> bool {
    true
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_output_grace_ms() -> u64 {
    2000
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            prefer_wrapper: true,
            working_dir: default_working_dir(),
            timeout_secs: default_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            output_grace_ms: default_output_grace_ms(),
        }
    }
}

/// `[paths]` section. Relative entries are resolved against `runner.working_dir`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_features_dir")]
    pub features_dir: PathBuf,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,

    #[serde(default = "default_tags_file")]
    pub tags_file: PathBuf,
}

fn default_features_dir() -> PathBuf {
    PathBuf::from("src/test/resources/features")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("target/cucumber-reports")
}

fn default_history_file() -> PathBuf {
    PathBuf::from("data/execution-history.json")
}

fn default_tags_file() -> PathBuf {
    PathBuf::from("data/tags.json")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            features_dir: default_features_dir(),
            reports_dir: default_reports_dir(),
            history_file: default_history_file(),
            tags_file: default_tags_file(),
        }
    }
}

/// `[progress]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressSection {
    /// Per-subscriber buffer; slow subscribers beyond this lag and lose events.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see `validate.rs`), so
/// holders can rely on the numeric settings being non-zero.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub runner: RunnerSection,
    pub paths: PathsSection,
    pub progress: ProgressSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            runner: raw.runner,
            paths: raw.paths,
            progress: raw.progress,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.runner.timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.runner.heartbeat_secs)
    }

    pub fn output_grace(&self) -> Duration {
        Duration::from_millis(self.runner.output_grace_ms)
    }

    /// Working directory of the runner, resolved against `config_root`.
    pub fn working_dir(&self, config_root: &Path) -> PathBuf {
        resolve(config_root, &self.runner.working_dir)
    }

    pub fn features_dir(&self, config_root: &Path) -> PathBuf {
        resolve(&self.working_dir(config_root), &self.paths.features_dir)
    }

    pub fn reports_dir(&self, config_root: &Path) -> PathBuf {
        resolve(&self.working_dir(config_root), &self.paths.reports_dir)
    }

    pub fn history_file(&self, config_root: &Path) -> PathBuf {
        resolve(&self.working_dir(config_root), &self.paths.history_file)
    }

    pub fn tags_file(&self, config_root: &Path) -> PathBuf {
        resolve(&self.working_dir(config_root), &self.paths.tags_file)
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
