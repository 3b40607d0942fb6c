// src/coordinator/preflight.rs

//! Host version check run before the function host is launched.
//!
//! Function hosts older than a known build cannot run workers on Java 9 or
//! later. The check asks the host for its version (`<executable> -v`) and
//! the Java launcher for its runtime version (`java -version`). When either
//! is unknown the check is skipped with a warning; only a host known to be
//! too old for a known runtime fails the run.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{HostrunError, Result};
use crate::process::resolve_executable;

/// Upper bound for each version query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Dotted numeric version, e.g. `3.0.2630` or `1.8.0_292`.
///
/// Missing components compare as zero, so `3` equals `3.0.0`.
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

impl Version {
    /// Parse the leading digits of every dot-separated component.
    ///
    /// Returns `None` unless the first component starts with a digit.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = Vec::new();
        for component in s.trim().split('.') {
            let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
            match digits.parse::<u64>() {
                Ok(n) => parts.push(n),
                Err(_) if parts.is_empty() => return None,
                Err(_) => break,
            }
            if digits.len() != component.len() {
                break;
            }
        }
        Some(Version(parts))
    }

    pub fn major(&self) -> u64 {
        self.0.first().copied().unwrap_or(0)
    }

    /// Java feature release: `1.8.0_292` is 8, `17.0.2` is 17.
    pub fn java_feature(&self) -> u64 {
        match self.0.as_slice() {
            [1, minor, ..] => *minor,
            _ => self.major(),
        }
    }

    fn component(&self, i: usize) -> u64 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Oldest host build able to run workers on `java_feature`, or `None` when
/// any host will do.
pub fn minimum_host_version(host: &Version, java_feature: u64) -> Option<Version> {
    if java_feature < 9 {
        return None;
    }
    let minimum = if host.major() >= 3 {
        [3, 0, 2630]
    } else {
        [2, 7, 2628]
    };
    Some(Version(minimum.to_vec()))
}

/// Extract the runtime version from `java -version` output.
pub fn parse_java_version(output: &str) -> Option<Version> {
    let re = Regex::new(r#"version "([^"]+)""#).ok()?;
    let caps = re.captures(output)?;
    Version::parse(&caps[1])
}

/// How the version check is performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPreflight {
    /// Arguments making the host print its version.
    pub version_args: Vec<String>,
    /// Java launcher to query. `JAVA_HOME/bin/java`, then `java` on `PATH`,
    /// when unset.
    pub java: Option<PathBuf>,
}

impl Default for VersionPreflight {
    fn default() -> Self {
        Self {
            version_args: vec!["-v".to_string()],
            java: None,
        }
    }
}

impl VersionPreflight {
    /// Fail with [`HostrunError::Launch`] if the host is known to be too old
    /// for the Java runtime it would use.
    pub async fn verify(&self, executable: &Path, env: &BTreeMap<String, String>) -> Result<()> {
        let program = resolve_executable(executable)?;

        let host = match query(&program, &self.version_args, env).await {
            Some(out) => out
                .stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .and_then(Version::parse),
            None => None,
        };
        let Some(host) = host else {
            warn!(program = ?program, "could not read host version; skipping version check");
            return Ok(());
        };

        let java = match self.java_launcher(env) {
            Some(java) => query(&java, &["-version".to_string()], env)
                .await
                .and_then(|out| parse_java_version(&format!("{}\n{}", out.stderr, out.stdout))),
            None => None,
        };
        let Some(java) = java else {
            warn!(host_version = %host, "could not read Java version; skipping version check");
            return Ok(());
        };

        let feature = java.java_feature();
        debug!(host_version = %host, java = feature, "checking host version");

        match minimum_host_version(&host, feature) {
            Some(minimum) if host < minimum => Err(HostrunError::Launch(format!(
                "host version {host} is too old for Java {feature}; {minimum} or later is required"
            ))),
            _ => {
                info!(host_version = %host, java = feature, "host version check passed");
                Ok(())
            }
        }
    }

    fn java_launcher(&self, env: &BTreeMap<String, String>) -> Option<PathBuf> {
        if let Some(java) = &self.java {
            return Some(java.clone());
        }

        let java_home = env
            .get("JAVA_HOME")
            .cloned()
            .or_else(|| std::env::var("JAVA_HOME").ok())
            .filter(|h| !h.trim().is_empty());
        if let Some(home) = java_home {
            let candidate = Path::new(&home).join("bin").join("java");
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        which::which("java").ok()
    }
}

struct QueryOutput {
    stdout: String,
    stderr: String,
}

/// Run `program args` to completion and capture its output. Any failure,
/// including a non-zero exit or a timeout, yields `None`.
async fn query(program: &Path, args: &[String], env: &BTreeMap<String, String>) -> Option<QueryOutput> {
    let run = Command::new(program)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(QUERY_TIMEOUT, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(program = ?program, error = %e, "version query failed to start");
            return None;
        }
        Err(_) => {
            debug!(program = ?program, "version query timed out");
            return None;
        }
    };

    if !output.status.success() {
        debug!(program = ?program, status = ?output.status, "version query exited non-zero");
        return None;
    }

    Some(QueryOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
