// src/process/mod.rs

//! Process supervision.
//!
//! - [`supervisor`] holds `ProcessSupervisor`, the production
//!   [`ProcessLauncher`]: it validates the executable, spawns it in its own
//!   process group with piped output and hands back a session.
//! - [`session`] is the per-process handle: captured streams, monotonic
//!   state, concurrent-safe `wait` / `kill`.
//! - [`tree`] kills a whole process tree on Unix and Windows.
//!
//! Components that spawn helpers depend on the [`ProcessLauncher`] trait so
//! tests can substitute a spy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::Result;

pub mod session;
pub mod supervisor;
pub mod tree;

pub use session::{ExitOutcome, ProcessSession, SessionState, SessionStateHandle};
pub use supervisor::{ProcessSupervisor, resolve_executable};
pub use tree::{kill_tree, process_exists};

/// Fully resolved command line for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Short name used in logs (`host`, `extension-install`).
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Overlay applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl CommandLine {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Something that can start a process and return a session for it.
pub trait ProcessLauncher: Send + Sync {
    /// Start `command` with `work_dir` as its current directory.
    ///
    /// Fails with [`HostrunError::Launch`](crate::errors::HostrunError::Launch)
    /// when the executable is missing or not executable.
    fn launch(&self, command: &CommandLine, work_dir: &Path) -> Result<ProcessSession>;
}
