// src/coordinator/events.rs

use crate::install::SkipReason;
use crate::staging::MissingSetting;

use super::phase::RunPhase;

/// Progress notifications published by a run.
///
/// Delivered on an unbounded channel supplied by the caller; the receiver
/// decides on which task or thread they are observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    PhaseChanged(RunPhase),
    /// A setting absent from the merged configuration.
    MissingSetting(MissingSetting),
    InstallSkipped(SkipReason),
    DependenciesInstalled,
    HostStarted { pid: u32 },
    Ready { line: String, debug_port: Option<u16> },
    /// A stderr line that matched the failure signal.
    FailureLine(String),
    DebugAttached { port: u16 },
    DebugAttachWarning { port: u16, message: String },
}
