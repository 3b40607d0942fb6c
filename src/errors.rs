// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The fatal stages of a run each get their own variant so callers can tell
//! a bad artifact from a failed extension install or a host that crashed.
//! Cancellation is deliberately absent: it is a
//! [`RunOutcome`](crate::coordinator::RunOutcome), not an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Staging could not be materialized; nothing was spawned.
    #[error("Preparation failed: {0}")]
    Preparation(String),

    /// The extension install helper exited non-zero.
    #[error("Dependency install failed with exit code {exit_code}")]
    DependencyInstall { exit_code: i32 },

    /// The executable is missing, not executable, or could not be spawned.
    #[error("Launch failed: {0}")]
    Launch(String),

    /// The primary host process exited non-zero.
    #[error("Host process exited with code {exit_code}{}", format_last_line(.last_error_line))]
    RuntimeFailure {
        exit_code: i32,
        last_error_line: Option<String>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_last_line(line: &Option<String>) -> String {
    match line {
        Some(l) => format!(": {l}"),
        None => String::new(),
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, HostrunError>;
