// src/logging.rs

//! Logging setup for `hostrun` using `tracing` + `tracing-subscriber`.
//!
//! Filter priority:
//! 1. `--log-level` CLI flag
//! 2. `HOSTRUN_LOG` environment variable, either a bare level (`debug`) or a
//!    full directive list (`hostrun=debug,hostrun::output=off`)
//! 3. `info`
//!
//! Logs go to stderr; stdout is left to the host output echoed by
//! [`StdioSink`](crate::stream::StdioSink).

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "HOSTRUN_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(lvl.as_str()),
        None => std::env::var(LOG_ENV)
            .ok()
            .and_then(|s| parse_filter(&s))
            .unwrap_or_else(|| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;

    Ok(())
}

/// Parse a `HOSTRUN_LOG` value. Blank or malformed values yield `None`.
pub fn parse_filter(s: &str) -> Option<EnvFilter> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    EnvFilter::try_new(s).ok()
}
