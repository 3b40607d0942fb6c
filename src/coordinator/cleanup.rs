// src/coordinator/cleanup.rs

use tracing::{debug, info};

use crate::process::kill_tree;
use crate::staging::StagingDir;

/// What a cleanup pass actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub killed_tree: bool,
    pub removed_staging: bool,
}

/// Owns the resources a run must release: the host's process tree and the
/// staging directory.
///
/// [`run`](Self::run) does the work exactly once; `Drop` runs it if the
/// coordinator future was dropped or panicked before reaching it.
#[derive(Debug, Default)]
pub(crate) struct Cleanup {
    staging: Option<StagingDir>,
    pid: Option<u32>,
    done: bool,
}

impl Cleanup {
    pub(crate) fn own_staging(&mut self, dir: StagingDir) {
        self.staging = Some(dir);
    }

    pub(crate) fn own_process(&mut self, pid: u32) {
        self.pid = Some(pid);
    }

    pub(crate) fn run(&mut self) -> CleanupReport {
        if self.done {
            debug!("cleanup already ran");
            return CleanupReport::default();
        }
        self.done = true;

        let mut report = CleanupReport::default();

        if let Some(pid) = self.pid {
            kill_tree(pid);
            report.killed_tree = true;
        }

        if let Some(dir) = self.staging.take() {
            // Removal failures are logged by the guard; nothing else to do.
            report.removed_staging = dir.remove().is_ok();
        }

        info!(
            killed_tree = report.killed_tree,
            removed_staging = report.removed_staging,
            "cleanup finished"
        );
        report
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if !self.done {
            self.run();
        }
    }
}
