// src/stream/multiplexer.rs

//! Concurrent stdout/stderr draining with readiness and failure detection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::sink::Sink;
use super::signal::{FailureSignal, ReadinessSignal};
use super::StreamKind;
use crate::process::{ProcessSession, SessionState, SessionStateHandle};

/// Published once, for the first line matching the readiness signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEvent {
    pub stream: StreamKind,
    pub line: String,
}

/// What one reader saw before reaching end of stream.
#[derive(Debug, Clone, Default)]
struct ReaderSummary {
    lines: usize,
    last_line: Option<String>,
    last_failure_line: Option<String>,
    ready_line: Option<String>,
}

/// Totals after both readers finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    /// Last stderr line that matched the failure signal.
    pub last_failure_line: Option<String>,
    /// Last stderr line of any kind.
    pub last_stderr_line: Option<String>,
    /// Line that matched the readiness signal, from whichever stream won.
    ///
    /// Unlike the ready channel this is only known once both readers
    /// finished, so it also covers a host that printed readiness and exited
    /// before anyone received the event.
    pub ready_line: Option<String>,
}

impl DrainSummary {
    /// Line to report when the process failed: the last failure match, or
    /// failing that the last stderr line.
    pub fn error_line(&self) -> Option<&str> {
        self.last_failure_line
            .as_deref()
            .or(self.last_stderr_line.as_deref())
    }
}

/// First-match-wins latch shared by the two readers.
///
/// The atomic is the only state either reader writes; the sender and state
/// handle are only used by the winner.
struct ReadyLatch {
    fired: AtomicBool,
    tx: mpsc::Sender<ReadyEvent>,
    state: Option<SessionStateHandle>,
}

impl ReadyLatch {
    fn already_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Returns whether this call won the latch.
    fn fire(&self, stream: StreamKind, line: &str) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!(stream = %stream, line, "readiness signal detected");
        if let Some(state) = &self.state {
            state.advance(SessionState::Ready);
        }
        // Capacity 1 and a single winner: this cannot be full.
        let _ = self.tx.try_send(ReadyEvent {
            stream,
            line: line.to_string(),
        });
        true
    }
}

/// Live handle on an attached pair of readers.
pub struct Attachment {
    /// Yields at most one event; closes once both streams ended.
    pub ready_rx: mpsc::Receiver<ReadyEvent>,
    /// Stderr lines matching the failure signal, in order.
    pub error_rx: mpsc::UnboundedReceiver<String>,
    stdout_task: JoinHandle<ReaderSummary>,
    stderr_task: JoinHandle<ReaderSummary>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("stdout_done", &self.stdout_task.is_finished())
            .field("stderr_done", &self.stderr_task.is_finished())
            .finish_non_exhaustive()
    }
}

impl Attachment {
    /// Wait for both readers to reach end of stream.
    pub async fn finish(mut self) -> DrainSummary {
        let out = (&mut self.stdout_task).await.unwrap_or_default();
        let err = (&mut self.stderr_task).await.unwrap_or_default();
        summarize(out, err)
    }

    /// Like [`finish`](Self::finish) but gives up after `limit`, aborting the
    /// readers. A descendant that escaped the process tree can keep a pipe
    /// open forever.
    pub async fn finish_within(mut self, limit: Duration) -> Option<DrainSummary> {
        let joined = tokio::time::timeout(limit, async {
            let out = (&mut self.stdout_task).await.unwrap_or_default();
            let err = (&mut self.stderr_task).await.unwrap_or_default();
            (out, err)
        })
        .await;

        match joined {
            Ok((out, err)) => Some(summarize(out, err)),
            Err(_) => {
                debug!("stream readers still open after {:?}; aborting them", limit);
                self.stdout_task.abort();
                self.stderr_task.abort();
                None
            }
        }
    }
}

fn summarize(out: ReaderSummary, err: ReaderSummary) -> DrainSummary {
    DrainSummary {
        stdout_lines: out.lines,
        stderr_lines: err.lines,
        last_failure_line: err.last_failure_line,
        last_stderr_line: err.last_line,
        ready_line: out.ready_line.or(err.ready_line),
    }
}

/// Attaches reader loops to a process's output streams.
///
/// One multiplexer can serve several attachments; each attachment has its own
/// readiness latch.
#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    sink: Arc<dyn Sink>,
    readiness: Arc<ReadinessSignal>,
    failure: Arc<FailureSignal>,
}

impl StreamMultiplexer {
    pub fn new(sink: Arc<dyn Sink>, readiness: ReadinessSignal, failure: FailureSignal) -> Self {
        Self {
            sink,
            readiness: Arc::new(readiness),
            failure: Arc::new(failure),
        }
    }

    /// Drain-only multiplexer: forwards lines, detects nothing.
    pub fn drain_only(sink: Arc<dyn Sink>) -> Self {
        Self::new(sink, ReadinessSignal::never(), FailureSignal::never())
    }

    /// Take the session's streams and attach to them. The reader that sees
    /// the readiness line also moves the session to `Ready`.
    ///
    /// Returns `None` if the streams were already taken.
    pub fn attach_session(&self, session: &mut ProcessSession) -> Option<Attachment> {
        let state = session.state_handle();
        let (stdout, stderr) = session.take_streams()?;
        Some(self.attach(stdout, stderr, Some(state)))
    }

    /// Spawn exactly two reader tasks, one per stream.
    pub fn attach<O, E>(&self, stdout: O, stderr: E, state: Option<SessionStateHandle>) -> Attachment
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<ReadyEvent>(1);
        let (error_tx, error_rx) = mpsc::unbounded_channel::<String>();

        let latch = Arc::new(ReadyLatch {
            fired: AtomicBool::new(false),
            tx: ready_tx,
            state,
        });

        let stdout_task = tokio::spawn(read_lines(
            stdout,
            StreamKind::Stdout,
            Arc::clone(&self.sink),
            Arc::clone(&self.readiness),
            None,
            Arc::clone(&latch),
        ));

        let stderr_task = tokio::spawn(read_lines(
            stderr,
            StreamKind::Stderr,
            Arc::clone(&self.sink),
            Arc::clone(&self.readiness),
            Some((Arc::clone(&self.failure), error_tx)),
            latch,
        ));

        Attachment {
            ready_rx,
            error_rx,
            stdout_task,
            stderr_task,
        }
    }
}

async fn read_lines<R>(
    stream: R,
    kind: StreamKind,
    sink: Arc<dyn Sink>,
    readiness: Arc<ReadinessSignal>,
    failure: Option<(Arc<FailureSignal>, mpsc::UnboundedSender<String>)>,
    latch: Arc<ReadyLatch>,
) -> ReaderSummary
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut summary = ReaderSummary::default();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(stream = %kind, error = %e, "read error; stopping reader");
                break;
            }
        }

        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf).into_owned();

        sink.line(kind, &line);
        summary.lines += 1;

        if !latch.already_fired() && readiness.matches(&line) && latch.fire(kind, &line) {
            summary.ready_line = Some(line.clone());
        }

        if let Some((signal, tx)) = &failure {
            if signal.matches(&line) {
                debug!(stream = %kind, line = %line, "failure signal matched");
                summary.last_failure_line = Some(line.clone());
                let _ = tx.send(line.clone());
            }
        }

        summary.last_line = Some(line);
    }

    debug!(stream = %kind, lines = summary.lines, "stream reader ended");
    summary
}
