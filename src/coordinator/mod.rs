// src/coordinator/mod.rs

//! Run orchestration.
//!
//! Split the same way as the rest of the crate: a pure [`phase`] state
//! machine with no IO, and an async [`runner`] that performs the stages and
//! owns cancellation, debugger attach and cleanup.

pub mod cleanup;
pub mod debug;
pub mod events;
pub mod phase;
pub mod preflight;
pub mod result;
pub mod runner;
pub mod spec;

pub use cleanup::CleanupReport;
pub use debug::{
    CommandAttacher, DEFAULT_DEBUG_PORT, DebugAttacher, DebugConfig, DebugPort, LogAttacher,
    find_free_port,
};
pub use events::RunEvent;
pub use phase::{PhaseTracker, RunPhase};
pub use preflight::{Version, VersionPreflight, minimum_host_version, parse_java_version};
pub use result::{RunOutcome, RunResult};
pub use runner::{Collaborators, RunCoordinator};
pub use spec::{InstallSpec, RunSpec, SETTINGS_ENV_TOKEN, STAGING_TOKEN};
