// src/process/session.rs

//! Handle to one spawned OS process.

use std::fmt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use super::tree::kill_tree;

/// Lifecycle of a session. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Created,
    Running,
    Ready,
    Terminated,
}

/// Shared handle that can advance a session's state.
///
/// Handed to the stream reader that detects readiness, and to the waiter
/// task that observes exit. Transitions backwards or to the same state are
/// ignored.
#[derive(Clone)]
pub struct SessionStateHandle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl fmt::Debug for SessionStateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionStateHandle")
            .field(&*self.tx.borrow())
            .finish()
    }
}

impl Default for SessionStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateHandle {
    /// A fresh handle in `Created`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Created);
        Self { tx: Arc::new(tx) }
    }

    /// Move to `next` if it is later than the current state. Returns whether
    /// the state changed.
    pub fn advance(&self, next: SessionState) -> bool {
        self.tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code; `128 + signal` when terminated by a signal, `-1` if unknown.
    pub code: i32,
    /// True when the exit was caused by [`ProcessSession::kill`].
    pub killed: bool,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.killed
    }

    fn from_status(status: std::io::Result<ExitStatus>, killed: bool) -> Self {
        let code = match status {
            Ok(status) => exit_code(&status),
            Err(_) => -1,
        };
        Self { code, killed }
    }
}

#[cfg(unix)]
fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// A spawned process: PID, captured output streams and lifecycle state.
///
/// The OS child is owned by a background waiter task; the session talks to it
/// through channels, which is what makes [`wait`](Self::wait) and
/// [`kill`](Self::kill) safe to use concurrently. Dropping a session that is
/// still running kills its tree.
pub struct ProcessSession {
    pid: u32,
    label: String,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    state: SessionStateHandle,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSession")
            .field("pid", &self.pid)
            .field("label", &self.label)
            .field("state", &self.state.current())
            .finish_non_exhaustive()
    }
}

impl ProcessSession {
    /// Take ownership of a freshly spawned child.
    ///
    /// Must be called inside a Tokio runtime: it spawns the waiter task.
    pub(crate) fn start(mut child: Child, pid: u32, label: String) -> Self {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let state = SessionStateHandle::new();
        let (exit_tx, exit_rx) = watch::channel::<Option<ExitOutcome>>(None);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let waiter_state = state.clone();
        let waiter_label = label.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => ExitOutcome::from_status(status, false),
                Ok(()) = &mut kill_rx => {
                    info!(process = %waiter_label, pid, "killing process tree");
                    kill_tree(pid);
                    let _ = child.start_kill();
                    ExitOutcome::from_status(child.wait().await, true)
                }
            };

            info!(
                process = %waiter_label,
                pid,
                exit_code = outcome.code,
                killed = outcome.killed,
                "process exited"
            );
            waiter_state.advance(SessionState::Terminated);
            let _ = exit_tx.send(Some(outcome));
        });

        state.advance(SessionState::Running);

        Self {
            pid,
            label,
            stdout,
            stderr,
            state,
            exit_rx,
            kill_tx: Mutex::new(Some(kill_tx)),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Handle for whoever detects readiness.
    pub fn state_handle(&self) -> SessionStateHandle {
        self.state.clone()
    }

    /// Take the captured output streams. Returns `None` on the second call.
    pub fn take_streams(&mut self) -> Option<(ChildStdout, ChildStderr)> {
        match (self.stdout.take(), self.stderr.take()) {
            (Some(out), Some(err)) => Some((out, err)),
            _ => None,
        }
    }

    /// Block until the process has exited.
    pub async fn wait(&self) -> ExitOutcome {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => (*outcome).unwrap_or(ExitOutcome { code: -1, killed: false }),
            Err(_) => {
                // The waiter task vanished without reporting.
                debug!(process = %self.label, pid = self.pid, "exit status channel closed");
                ExitOutcome { code: -1, killed: false }
            }
        }
    }

    /// Non-blocking check for an exit outcome.
    pub fn try_exit(&self) -> Option<ExitOutcome> {
        *self.exit_rx.borrow()
    }

    /// Kill the whole process tree. Idempotent; a no-op once terminated.
    pub fn kill(&self) {
        let sender = self
            .kill_tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        match sender {
            Some(tx) if self.try_exit().is_none() => {
                if tx.send(()).is_err() {
                    debug!(process = %self.label, pid = self.pid, "process already exited while killing");
                }
            }
            _ => debug!(process = %self.label, pid = self.pid, "kill requested for finished session; ignoring"),
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.try_exit().is_none() {
            self.kill();
        }
    }
}
