// src/install/mod.rs

//! Conditional extension install before the host starts.
//!
//! The install helper is a one-shot process run in the staging directory.
//! Only its exit code counts: zero is success, anything else is fatal. Its
//! output is drained into the run's sink through a multiplexer of its own.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::errors::{HostrunError, Result};
use crate::process::{CommandLine, ProcessLauncher, kill_tree};
use crate::staging::StagingManifest;
use crate::stream::{Sink, StreamMultiplexer};

/// How long to wait for helper output to drain after it exits.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Why the install step was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The host configuration references a self-contained extension bundle.
    BundleDeclared { id: String },
    /// Every declared capability is served without extensions.
    NoInstallCapabilities,
    /// The host profile has no install step.
    NotApplicable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BundleDeclared { id } => {
                write!(f, "host configuration declares extension bundle '{id}'")
            }
            SkipReason::NoInstallCapabilities => {
                f.write_str("all declared capabilities are served without extensions")
            }
            SkipReason::NotApplicable => f.write_str("host profile has no install step"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDecision {
    Skip(SkipReason),
    Install,
}

/// Decide whether extensions must be installed for this manifest.
pub fn decide(manifest: &StagingManifest) -> InstallDecision {
    if let Some(bundle) = manifest.extension_bundle() {
        if bundle.is_self_contained() {
            return InstallDecision::Skip(SkipReason::BundleDeclared {
                id: bundle.id.clone(),
            });
        }
    }

    if manifest.capabilities().iter().all(|c| c.needs_no_install()) {
        return InstallDecision::Skip(SkipReason::NoInstallCapabilities);
    }

    InstallDecision::Install
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Skipped(SkipReason),
    Installed,
    /// Stopped by a cancel request; not an error.
    Cancelled,
}

pub struct DependencyInstaller {
    launcher: Arc<dyn ProcessLauncher>,
    sink: Arc<dyn Sink>,
    /// `None` when the host profile has no install step.
    command: Option<CommandLine>,
}

impl fmt::Debug for DependencyInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyInstaller")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl DependencyInstaller {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        sink: Arc<dyn Sink>,
        command: Option<CommandLine>,
    ) -> Self {
        Self {
            launcher,
            sink,
            command,
        }
    }

    /// Run the install helper unless [`decide`] says it is not needed.
    pub async fn install_if_needed(
        &self,
        manifest: &StagingManifest,
        staging_dir: &Path,
        stop: &CancelSignal,
    ) -> Result<InstallOutcome> {
        let Some(command) = &self.command else {
            debug!("install step disabled for this host profile");
            return Ok(InstallOutcome::Skipped(SkipReason::NotApplicable));
        };

        if let InstallDecision::Skip(reason) = decide(manifest) {
            info!(%reason, "skipping extension install");
            return Ok(InstallOutcome::Skipped(reason));
        }

        if stop.is_cancelled() {
            return Ok(InstallOutcome::Cancelled);
        }

        info!(program = ?command.program, args = ?command.args, "installing extensions");
        let mut session = self.launcher.launch(command, staging_dir)?;
        let pid = session.pid();

        let attachment = StreamMultiplexer::drain_only(Arc::clone(&self.sink)).attach_session(&mut session);

        let (exit, cancelled) = tokio::select! {
            exit = session.wait() => (exit, false),
            _ = stop.cancelled() => {
                info!(pid, "cancel requested; stopping extension install");
                session.kill();
                (session.wait().await, true)
            }
        };

        // Reap anything the helper left behind so its pipes close.
        kill_tree(pid);
        if let Some(attachment) = attachment {
            if attachment.finish_within(DRAIN_GRACE).await.is_none() {
                warn!(pid, "install helper output did not close in time");
            }
        }

        if cancelled {
            debug!(pid, exit_code = exit.code, "install helper stopped by cancel");
            return Ok(InstallOutcome::Cancelled);
        }

        if exit.code != 0 {
            return Err(HostrunError::DependencyInstall {
                exit_code: exit.code,
            });
        }

        info!("extensions installed");
        Ok(InstallOutcome::Installed)
    }
}
