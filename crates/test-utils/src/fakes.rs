#![allow(dead_code)]

//! Collaborator doubles for coordinator and installer tests.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use hostrun::coordinator::DebugAttacher;
use hostrun::errors::Result;
use hostrun::process::{CommandLine, ProcessLauncher, ProcessSession, ProcessSupervisor};
use hostrun::stream::{Sink, StreamKind};

/// Launcher that records every command line, then starts it for real.
#[derive(Debug, Clone, Default)]
pub struct SpyLauncher {
    inner: ProcessSupervisor,
    calls: Arc<Mutex<Vec<(CommandLine, std::path::PathBuf)>>>,
}

impl SpyLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn work_dirs(&self) -> Vec<std::path::PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn launch_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.label).collect()
    }
}

impl ProcessLauncher for SpyLauncher {
    fn launch(&self, command: &CommandLine, work_dir: &Path) -> Result<ProcessSession> {
        self.calls
            .lock()
            .unwrap()
            .push((command.clone(), work_dir.to_path_buf()));
        self.inner.launch(command, work_dir)
    }
}

/// Sink that keeps every line in arrival order.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    lines: Arc<Mutex<Vec<(StreamKind, String)>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(StreamKind, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn lines_of(&self, stream: StreamKind) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, l)| l)
            .collect()
    }
}

impl Sink for CollectingSink {
    fn line(&self, stream: StreamKind, line: &str) {
        self.lines.lock().unwrap().push((stream, line.to_string()));
    }
}

/// Attacher that records the ports it was called with.
///
/// The call is recorded before the returned future is polled, so a count
/// taken after the run is exact even if the future never completed.
#[derive(Debug, Clone, Default)]
pub struct RecordingAttacher {
    ports: Arc<Mutex<Vec<u16>>>,
    fail_with: Option<String>,
}

impl RecordingAttacher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attach fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            ports: Arc::default(),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }

    pub fn attach_count(&self) -> usize {
        self.ports.lock().unwrap().len()
    }
}

impl DebugAttacher for RecordingAttacher {
    fn attach(&self, port: u16) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        self.ports.lock().unwrap().push(port);
        let fail_with = self.fail_with.clone();
        Box::pin(async move {
            match fail_with {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            }
        })
    }
}
