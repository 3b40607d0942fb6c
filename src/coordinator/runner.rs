// src/coordinator/runner.rs

//! Async shell around [`PhaseTracker`]: runs the stages, owns cancellation
//! and cleanup, and decides the run outcome.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::errors::{HostrunError, Result};
use crate::install::{DependencyInstaller, InstallOutcome};
use crate::process::{ProcessLauncher, ProcessSupervisor};
use crate::settings::SettingsStore;
use crate::staging::{PreparedStaging, StagingDirectoryPreparer};
use crate::stream::{Sink, StreamMultiplexer, TracingSink};

use super::cleanup::Cleanup;
use super::debug::{DebugAttacher, LogAttacher};
use super::events::RunEvent;
use super::phase::{PhaseTracker, RunPhase};
use super::result::{RunOutcome, RunResult};
use super::spec::RunSpec;

/// How long readers may keep draining after the host exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long a pending debugger attach is awaited after the host exited.
const ATTACH_GRACE: Duration = Duration::from_secs(1);

/// Injected dependencies of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SettingsStore>,
    pub sink: Arc<dyn Sink>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub attacher: Arc<dyn DebugAttacher>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("store", &self.store)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Real launcher, tracing sink and log-only attacher.
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            sink: Arc::new(TracingSink),
            launcher: Arc::new(ProcessSupervisor::new()),
            attacher: Arc::new(LogAttacher),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_attacher(mut self, attacher: Arc<dyn DebugAttacher>) -> Self {
        self.attacher = attacher;
        self
    }
}

/// Drives one run from staging to cleanup.
///
/// A coordinator is consumed by [`run`](Self::run): one coordinator, one
/// staging directory, at most one host process.
pub struct RunCoordinator {
    spec: RunSpec,
    collab: Collaborators,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("spec", &self.spec)
            .field("collab", &self.collab)
            .finish_non_exhaustive()
    }
}

/// Where a run stands once the host is gone, before cleanup numbers are in.
struct HostExit {
    code: i32,
    cancelled: bool,
    ready: bool,
    last_failure_line: Option<String>,
    attach_task: Option<JoinHandle<()>>,
}

impl RunCoordinator {
    pub fn new(spec: RunSpec, collab: Collaborators) -> Self {
        Self {
            spec,
            collab,
            events: None,
        }
    }

    /// Publish [`RunEvent`]s on `tx`. Send errors (receiver gone) are ignored.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run every stage and return the terminal result.
    ///
    /// Cancellation is reported as [`RunOutcome::Cancelled`]; preparation,
    /// install and launch failures as errors. Cleanup has finished by the
    /// time this returns, whatever the outcome.
    pub async fn run(self, stop: CancelSignal) -> Result<RunResult> {
        let mut phases = PhaseTracker::new();
        let mut cleanup = Cleanup::default();

        let result = self.drive(&mut phases, &mut cleanup, &stop).await;

        cleanup.run();
        self.enter(&mut phases, RunPhase::Terminated);

        match &result {
            Ok(run) => info!(
                outcome = %run.outcome,
                exit_code = ?run.exit_code,
                ready = run.ready,
                "run finished"
            ),
            Err(e) => warn!(error = %e, "run failed"),
        }
        result
    }

    async fn drive(
        &self,
        phases: &mut PhaseTracker,
        cleanup: &mut Cleanup,
        stop: &CancelSignal,
    ) -> Result<RunResult> {
        let spec = &self.spec;

        // Preparing
        self.enter(phases, RunPhase::Preparing);
        if stop.is_cancelled() {
            return Ok(self.cancelled_early(phases));
        }

        let preparer = StagingDirectoryPreparer::new(Arc::clone(&self.collab.store));
        let artifacts = spec.artifacts.clone();
        let declared = spec.declared.clone();
        let PreparedStaging { manifest, dir } =
            tokio::task::spawn_blocking(move || preparer.prepare(&artifacts, &declared))
                .await
                .map_err(|e| HostrunError::Preparation(format!("staging task failed: {e}")))??;
        cleanup.own_staging(dir);

        for missing in manifest.missing_settings() {
            self.emit(RunEvent::MissingSetting(missing.clone()));
        }

        if stop.is_cancelled() {
            return Ok(self.cancelled_early(phases));
        }

        // InstallingDependencies
        self.enter(phases, RunPhase::InstallingDependencies);
        let installer = DependencyInstaller::new(
            Arc::clone(&self.collab.launcher),
            Arc::clone(&self.collab.sink),
            spec.install_command(),
        );
        match installer.install_if_needed(&manifest, manifest.root(), stop).await? {
            InstallOutcome::Cancelled => return Ok(self.cancelled_early(phases)),
            InstallOutcome::Skipped(reason) => self.emit(RunEvent::InstallSkipped(reason)),
            InstallOutcome::Installed => self.emit(RunEvent::DependenciesInstalled),
        }

        if stop.is_cancelled() {
            return Ok(self.cancelled_early(phases));
        }

        // Launching
        self.enter(phases, RunPhase::Launching);
        if let Some(check) = &spec.preflight {
            check.verify(&spec.executable, &spec.env).await?;
        }

        let debug_port = if spec.debug.enabled {
            let port = spec.debug.resolve_port()?;
            info!(port, "debugging enabled");
            Some(port)
        } else {
            None
        };

        let command = spec.host_command(&manifest, debug_port);
        info!(program = ?command.program, args = ?command.args, "launching host");
        let mut session = self.collab.launcher.launch(&command, manifest.root())?;
        let pid = session.pid();
        cleanup.own_process(pid);

        let multiplexer = StreamMultiplexer::new(
            Arc::clone(&self.collab.sink),
            spec.readiness.clone(),
            spec.failure.clone(),
        );
        let mut attachment = multiplexer
            .attach_session(&mut session)
            .ok_or_else(|| HostrunError::Launch("host output streams were not captured".to_string()))?;

        // Running
        self.enter(phases, RunPhase::Running);
        self.emit(RunEvent::HostStarted { pid });

        let mut host = HostExit {
            code: -1,
            cancelled: false,
            ready: false,
            last_failure_line: None,
            attach_task: None,
        };
        let mut ready_open = true;
        let mut errors_open = true;

        let exit = loop {
            tokio::select! {
                exit = session.wait() => break exit,

                event = attachment.ready_rx.recv(), if ready_open => {
                    ready_open = false;
                    let Some(event) = event else { continue };
                    if host.cancelled {
                        debug!(line = %event.line, "readiness after cancel request; ignoring");
                        continue;
                    }

                    host.ready = true;
                    self.enter(phases, RunPhase::Ready);
                    self.emit(RunEvent::Ready { line: event.line, debug_port });
                    if let Some(port) = debug_port {
                        host.attach_task = Some(self.spawn_attach(port));
                    }
                }

                line = attachment.error_rx.recv(), if errors_open => match line {
                    Some(line) => {
                        self.emit(RunEvent::FailureLine(line.clone()));
                        host.last_failure_line = Some(line);
                    }
                    None => errors_open = false,
                },

                _ = stop.cancelled(), if !host.cancelled => {
                    info!(pid, "cancel requested; stopping host");
                    host.cancelled = true;
                    self.enter(phases, RunPhase::Cancelling);
                    session.kill();
                }
            }
        };
        host.code = exit.code;

        // Reap descendants and release the staging directory before waiting
        // on output, so pipes held by leftovers close.
        cleanup.run();

        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(line) = attachment.error_rx.recv().await {
                self.emit(RunEvent::FailureLine(line.clone()));
                host.last_failure_line = Some(line);
            }
        })
        .await
        .is_ok();

        // Readiness printed just before a quick exit still counts, but there
        // is nobody left to attach to. The stdout reader may still be busy
        // when stderr closes, so look again once both readers are joined.
        let mut late_ready = if host.ready || host.cancelled {
            None
        } else {
            attachment.ready_rx.try_recv().ok().map(|event| event.line)
        };

        let grace = if drained { DRAIN_GRACE } else { Duration::ZERO };
        let summary = attachment.finish_within(grace).await;
        if summary.is_none() {
            warn!(pid, "host output did not close after exit");
        }

        if late_ready.is_none() && !host.ready && !host.cancelled {
            late_ready = summary.as_ref().and_then(|s| s.ready_line.clone());
        }
        if let Some(line) = late_ready {
            debug!(line = %line, "readiness seen after host exit");
            host.ready = true;
            self.enter(phases, RunPhase::Ready);
            self.emit(RunEvent::Ready { line, debug_port });
        }

        if let Some(task) = host.attach_task.take() {
            if tokio::time::timeout(ATTACH_GRACE, task).await.is_err() {
                debug!("debugger attach still pending at exit; detaching");
            }
        }

        let outcome = if host.cancelled {
            RunOutcome::Cancelled
        } else if host.code == 0 {
            RunOutcome::Succeeded
        } else {
            RunOutcome::RuntimeFailure
        };

        let last_error_line = match outcome {
            RunOutcome::RuntimeFailure => host.last_failure_line.clone().or_else(|| {
                summary
                    .as_ref()
                    .and_then(|s| s.error_line())
                    .map(str::to_string)
            }),
            RunOutcome::Succeeded | RunOutcome::Cancelled => host.last_failure_line.clone(),
        };

        if outcome == RunOutcome::RuntimeFailure {
            warn!(
                pid,
                exit_code = host.code,
                last_error_line = ?last_error_line,
                "host exited with failure"
            );
        }

        Ok(RunResult {
            outcome,
            exit_code: Some(host.code),
            ready: host.ready,
            last_error_line,
            debug_port,
        })
    }

    fn spawn_attach(&self, port: u16) -> JoinHandle<()> {
        let attacher = Arc::clone(&self.collab.attacher);
        let events = self.events.clone();

        tokio::spawn(async move {
            let event = match attacher.attach(port).await {
                Ok(()) => {
                    info!(port, "debugger attached");
                    RunEvent::DebugAttached { port }
                }
                Err(e) => {
                    warn!(port, error = %format!("{e:#}"), "debugger attach failed; host keeps running");
                    RunEvent::DebugAttachWarning {
                        port,
                        message: format!("{e:#}"),
                    }
                }
            };
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        })
    }

    fn cancelled_early(&self, phases: &mut PhaseTracker) -> RunResult {
        info!(phase = %phases.current(), "cancel requested before the host started");
        self.enter(phases, RunPhase::Cancelling);
        RunResult::cancelled_before_launch()
    }

    fn enter(&self, phases: &mut PhaseTracker, next: RunPhase) {
        if phases.advance(next) {
            self.emit(RunEvent::PhaseChanged(next));
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
