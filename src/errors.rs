// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only the failures that reach a caller synchronously live here. A runner
//! process that exits non-zero, times out or is cancelled is not an error:
//! it ends up as a terminal [`ExecutionStatus`](crate::types::ExecutionStatus)
//! on the execution record instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BddrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Bad request: empty/unknown tag set, unknown feature, reused id.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The runner command could not be started at all.
    #[error("Failed to launch `{command}`: {source}")]
    LaunchError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("History store error: {0}")]
    HistoryError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BddrunError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BddrunError::ValidationError(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BddrunError>;
