// src/coordinator/result.rs

use std::fmt;

use crate::errors::{HostrunError, Result};

/// Terminal outcome kind of a run that got as far as a host process (or was
/// cancelled before it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The host exited with code zero.
    Succeeded,
    /// The host exited non-zero without a stop request.
    RuntimeFailure,
    /// A stop was requested; the exit code is irrelevant.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => f.write_str("succeeded"),
            RunOutcome::RuntimeFailure => f.write_str("runtime failure"),
            RunOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// `None` when the run was cancelled before a host was launched.
    pub exit_code: Option<i32>,
    /// Whether the readiness signal was ever seen.
    pub ready: bool,
    /// Last matched failure line, or the last stderr line on failure.
    pub last_error_line: Option<String>,
    pub debug_port: Option<u16>,
}

impl RunResult {
    pub(crate) fn cancelled_before_launch() -> Self {
        Self {
            outcome: RunOutcome::Cancelled,
            exit_code: None,
            ready: false,
            last_error_line: None,
            debug_port: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == RunOutcome::Cancelled
    }

    /// Turn a runtime failure into [`HostrunError::RuntimeFailure`]; success
    /// and cancellation pass through.
    pub fn into_result(self) -> Result<RunResult> {
        match self.outcome {
            RunOutcome::RuntimeFailure => Err(HostrunError::RuntimeFailure {
                exit_code: self.exit_code.unwrap_or(-1),
                last_error_line: self.last_error_line,
            }),
            RunOutcome::Succeeded | RunOutcome::Cancelled => Ok(self),
        }
    }
}
