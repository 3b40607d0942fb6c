// src/coordinator/phase.rs

//! Pure run-phase state machine.
//!
//! No Tokio, channels or IO here: the coordinator asks the tracker before
//! every transition and the tracker refuses anything the table does not
//! allow.

use std::fmt;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Idle,
    Preparing,
    InstallingDependencies,
    Launching,
    Running,
    Ready,
    Cancelling,
    Terminated,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Terminated)
    }

    /// Allowed edges:
    ///
    /// - the forward chain `Idle → Preparing → InstallingDependencies →
    ///   Launching → Running → Ready`,
    /// - any non-terminal phase to `Cancelling` (once),
    /// - any non-terminal phase to `Terminated` (failures short-circuit).
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;

        match (self, next) {
            (Terminated, _) => false,
            (Cancelling, Cancelling) => false,
            (_, Cancelling) | (_, Terminated) => true,
            (Idle, Preparing)
            | (Preparing, InstallingDependencies)
            | (InstallingDependencies, Launching)
            | (Launching, Running)
            | (Running, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Preparing => "preparing",
            RunPhase::InstallingDependencies => "installing-dependencies",
            RunPhase::Launching => "launching",
            RunPhase::Running => "running",
            RunPhase::Ready => "ready",
            RunPhase::Cancelling => "cancelling",
            RunPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Current phase plus the path taken to reach it.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    history: Vec<RunPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            history: vec![RunPhase::Idle],
        }
    }

    pub fn current(&self) -> RunPhase {
        self.history.last().copied().unwrap_or(RunPhase::Idle)
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub fn is_cancelling(&self) -> bool {
        self.history.contains(&RunPhase::Cancelling)
    }

    /// Apply a transition if allowed. Returns whether it was applied.
    pub fn advance(&mut self, next: RunPhase) -> bool {
        let current = self.current();
        if current.can_transition_to(next) {
            debug!(from = %current, to = %next, "run phase transition");
            self.history.push(next);
            true
        } else {
            warn!(from = %current, to = %next, "ignoring invalid run phase transition");
            false
        }
    }
}
