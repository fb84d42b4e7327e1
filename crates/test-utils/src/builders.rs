#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bddrun::catalog::FeatureCatalog;
use bddrun::config::{ConfigFile, RawConfigFile};
use bddrun::engine::{Collaborators, ExecutionRegistry, Orchestrator, RunSettings};
use bddrun::exec::{CucumberSummaryParser, OutputParser, ProcessLauncher, RunnerCommand};
use bddrun::fs::{FileSystem, RealFileSystem};
use bddrun::history::HistoryStore;
use bddrun::progress::ProgressBroadcaster;
use bddrun::tags::TagValidator;

use crate::fakes::{AllowAllTags, MemoryHistory, ScriptLauncher, StaticCatalog};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn command(mut self, command: &str) -> Self {
        self.config.runner.command = command.to_string();
        self
    }

    pub fn prefer_wrapper(mut self, val: bool) -> Self {
        self.config.runner.prefer_wrapper = val;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.runner.working_dir = dir.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.runner.timeout_secs = secs;
        self
    }

    pub fn heartbeat_secs(mut self, secs: u64) -> Self {
        self.config.runner.heartbeat_secs = secs;
        self
    }

    pub fn features_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.paths.features_dir = dir.into();
        self
    }

    pub fn reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.paths.reports_dir = dir.into();
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.progress.channel_capacity = capacity;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An orchestrator wired to fakes, plus handles on those fakes.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub launcher: Arc<ScriptLauncher>,
    pub history: Arc<MemoryHistory>,
    pub registry: Arc<ExecutionRegistry>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub settings: RunSettings,
}

/// Builder for [`Harness`].
///
/// Defaults: a script that exits 0 without output, an empty catalog, every
/// tag accepted, a 30s timeout, a 10s heartbeat and a report directory that
/// does not exist.
pub struct HarnessBuilder {
    launcher: ScriptLauncher,
    catalog: StaticCatalog,
    tags: Option<Arc<dyn TagValidator>>,
    parser: Option<Arc<dyn OutputParser>>,
    history: Arc<MemoryHistory>,
    timeout: Duration,
    heartbeat: Duration,
    output_grace: Duration,
    reports_dir: PathBuf,
    features_dir: PathBuf,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            launcher: ScriptLauncher::new("exit 0"),
            catalog: StaticCatalog::empty(),
            tags: None,
            parser: None,
            history: Arc::new(MemoryHistory::new()),
            timeout: Duration::from_secs(30),
            heartbeat: Duration::from_secs(10),
            output_grace: Duration::from_millis(500),
            reports_dir: std::env::temp_dir().join("bddrun-test-missing-reports"),
            features_dir: PathBuf::from("features"),
        }
    }

    pub fn script(mut self, script: &str) -> Self {
        self.launcher = ScriptLauncher::new(script);
        self
    }

    pub fn launcher(mut self, launcher: ScriptLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn feature(mut self, name: &str, tags: &[&str]) -> Self {
        self.catalog = self.catalog.with_feature(name, tags);
        self
    }

    pub fn tags(mut self, validator: impl TagValidator + 'static) -> Self {
        self.tags = Some(Arc::new(validator));
        self
    }

    pub fn parser(mut self, parser: impl OutputParser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn history(mut self, history: MemoryHistory) -> Self {
        self.history = Arc::new(history);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn output_grace(mut self, grace: Duration) -> Self {
        self.output_grace = grace;
        self
    }

    pub fn reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = dir.into();
        self
    }

    pub fn build(self) -> Harness {
        let launcher = Arc::new(self.launcher);
        let broadcaster = Arc::new(ProgressBroadcaster::default());
        let registry = Arc::new(ExecutionRegistry::new(Arc::clone(&broadcaster)));

        let settings = RunSettings {
            runner: RunnerCommand::new("mvn", "."),
            features_dir: self.features_dir,
            reports_dir: self.reports_dir,
            timeout: self.timeout,
            heartbeat: self.heartbeat,
            output_grace: self.output_grace,
        };

        let catalog: Arc<dyn FeatureCatalog> = Arc::new(self.catalog);
        let tags = self.tags.unwrap_or_else(|| Arc::new(AllowAllTags));
        let parser = self.parser.unwrap_or_else(|| {
            Arc::new(CucumberSummaryParser::new().expect("parser patterns compile"))
        });
        let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
        let launcher_dyn: Arc<dyn ProcessLauncher> = launcher.clone();
        let history_dyn: Arc<dyn HistoryStore> = self.history.clone();

        let collaborators = Collaborators {
            launcher: launcher_dyn,
            catalog,
            tags,
            history: history_dyn,
            parser,
            fs,
        };

        let orchestrator = Orchestrator::new(
            settings.clone(),
            collaborators,
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
        );

        Harness {
            orchestrator,
            launcher,
            history: self.history,
            registry,
            broadcaster,
            settings,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
