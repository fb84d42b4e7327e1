// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BddrunError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = BddrunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_runner(cfg)?;
    validate_progress(cfg)?;
    Ok(())
}

fn validate_runner(cfg: &RawConfigFile) -> Result<()> {
    let runner = &cfg.runner;

    if runner.command.trim().is_empty() {
        return Err(BddrunError::ConfigError(
            "[runner].command must not be empty".to_string(),
        ));
    }

    if runner.timeout_secs == 0 {
        return Err(BddrunError::ConfigError(
            "[runner].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }

    if runner.heartbeat_secs == 0 {
        return Err(BddrunError::ConfigError(
            "[runner].heartbeat_secs must be >= 1 (got 0)".to_string(),
        ));
    }

    if runner.heartbeat_secs >= runner.timeout_secs {
        return Err(BddrunError::ConfigError(format!(
            "[runner].heartbeat_secs ({}) must be shorter than timeout_secs ({})",
            runner.heartbeat_secs, runner.timeout_secs
        )));
    }

    Ok(())
}

fn validate_progress(cfg: &RawConfigFile) -> Result<()> {
    if cfg.progress.channel_capacity == 0 {
        return Err(BddrunError::ConfigError(
            "[progress].channel_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
