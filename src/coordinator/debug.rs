// src/coordinator/debug.rs

//! Debug configuration and the debugger-attach collaborator.

use std::future::Future;
use std::net::TcpListener;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::process::Command;
use tracing::info;

use crate::errors::{HostrunError, Result};

/// First port tried when the debug port is auto-selected.
pub const DEFAULT_DEBUG_PORT: u16 = 5005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugPort {
    Fixed(u16),
    /// First free port at or above `start`.
    Auto { start: u16 },
}

impl Default for DebugPort {
    fn default() -> Self {
        DebugPort::Auto {
            start: DEFAULT_DEBUG_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub port: DebugPort,
    /// Appended to the host command line; `{port}` is substituted.
    pub agent_args: Vec<String>,
}

impl DebugConfig {
    pub fn resolve_port(&self) -> Result<u16> {
        match self.port {
            DebugPort::Fixed(port) => Ok(port),
            DebugPort::Auto { start } => find_free_port(start).ok_or_else(|| {
                HostrunError::Launch(format!("no free debug port at or above {start}"))
            }),
        }
    }

    pub fn agent_args_for(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.agent_args
            .iter()
            .map(|arg| arg.replace("{port}", &port))
            .collect()
    }
}

/// First port in `start..=65535` that can be bound on the loopback address.
pub fn find_free_port(start: u16) -> Option<u16> {
    (start..=u16::MAX).find(|port| TcpListener::bind(("127.0.0.1", *port)).is_ok())
}

/// Attaches a debugger to the host once it is ready.
///
/// Called at most once per run. A failure is reported as a warning; the
/// host keeps running undebugged.
pub trait DebugAttacher: Send + Sync {
    fn attach(&self, port: u16) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Only announces the port; for users attaching from their own tooling.
#[derive(Debug, Clone, Default)]
pub struct LogAttacher;

impl DebugAttacher for LogAttacher {
    fn attach(&self, port: u16) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            info!(port, "host is ready; attach a debugger to localhost:{port}");
            Ok(())
        })
    }
}

/// Starts a debugger front-end command, e.g. `jdb -attach localhost:{port}`.
///
/// The command is detached: it is neither waited for nor killed with the run.
#[derive(Debug, Clone)]
pub struct CommandAttacher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandAttacher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl DebugAttacher for CommandAttacher {
    fn attach(&self, port: u16) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let port_str = port.to_string();
            let args: Vec<String> = self.args.iter().map(|a| a.replace("{port}", &port_str)).collect();

            let child = Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .spawn()
                .with_context(|| format!("starting debugger {:?}", self.program))?;

            info!(port, pid = ?child.id(), program = ?self.program, "debugger started");
            Ok(())
        })
    }
}
