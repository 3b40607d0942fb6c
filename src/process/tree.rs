// src/process/tree.rs

//! Process-tree termination.
//!
//! On Unix every launched process leads its own process group, so the tree
//! is addressed by signalling the group. On Windows `taskkill /T` walks the
//! parent/child relation instead.

use tracing::{debug, warn};

/// Forcibly terminate the process rooted at `pid` and all its descendants.
///
/// Never fails: a tree that is already gone is the desired end state.
#[cfg(unix)]
pub fn kill_tree(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range; cannot signal process group");
        return;
    };

    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "sent SIGKILL to process group"),
        Err(Errno::ESRCH) => debug!(pid, "process group already gone"),
        Err(e) => warn!(pid, error = %e, "failed to signal process group"),
    }
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) {
    use std::process::{Command, Stdio};

    let result = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match result {
        Ok(status) if status.success() => debug!(pid, "taskkill terminated process tree"),
        Ok(status) => debug!(pid, code = ?status.code(), "taskkill reported no process to kill"),
        Err(e) => warn!(pid, error = %e, "failed to run taskkill"),
    }
}

/// Whether a live (non-zombie) process with this pid exists.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    // A killed process whose parent is gone may linger as a zombie until
    // something reaps it; it no longer runs, so it does not count.
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        if let Some(state) = stat.rsplit(')').next().and_then(|rest| rest.trim().chars().next()) {
            return !matches!(state, 'Z' | 'X');
        }
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(windows)]
pub fn process_exists(pid: u32) -> bool {
    use std::process::{Command, Stdio};

    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .stderr(Stdio::null())
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}
