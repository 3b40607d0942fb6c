// src/process/supervisor.rs

//! Real process launcher built on `tokio::process::Command`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::session::ProcessSession;
use super::{CommandLine, ProcessLauncher};
use crate::errors::{HostrunError, Result};

/// Spawns processes as leaders of their own process tree.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for ProcessSupervisor {
    fn launch(&self, command: &CommandLine, work_dir: &Path) -> Result<ProcessSession> {
        let program = resolve_executable(&command.program)?;

        info!(
            process = %command.label,
            program = ?program,
            args = ?command.args,
            cwd = ?work_dir,
            "starting process"
        );

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .current_dir(work_dir)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // New process group so the whole tree can be signalled at once.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            HostrunError::Launch(format!("spawning '{}' ({:?}): {e}", command.label, program))
        })?;

        let pid = child.id().ok_or_else(|| {
            HostrunError::Launch(format!("process '{}' exited before it could be tracked", command.label))
        })?;

        debug!(process = %command.label, pid, "process spawned");
        Ok(ProcessSession::start(child, pid, command.label.clone()))
    }
}

/// Resolve the program to an absolute path and check it can be executed.
///
/// Bare names (`func`, `docker`) are looked up on `PATH`; anything with a
/// directory component is taken relative to the current directory.
pub fn resolve_executable(program: &Path) -> Result<PathBuf> {
    let is_bare_name = program.components().count() == 1 && !program.is_absolute();

    if is_bare_name {
        return which::which(program).map_err(|e| {
            HostrunError::Launch(format!("executable {:?} not found on PATH: {e}", program))
        });
    }

    let absolute = std::path::absolute(program)
        .map_err(|e| HostrunError::Launch(format!("resolving {:?}: {e}", program)))?;

    let meta = std::fs::metadata(&absolute)
        .map_err(|_| HostrunError::Launch(format!("executable {:?} does not exist", absolute)))?;

    if !meta.is_file() {
        return Err(HostrunError::Launch(format!("{:?} is not a file", absolute)));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(HostrunError::Launch(format!("{:?} is not executable", absolute)));
        }
    }

    Ok(absolute)
}
