use std::fmt;

use serde::Deserialize;

/// Which kind of host is being launched.
///
/// The profile only supplies defaults (readiness/failure patterns, install
/// step, debug agent arguments); every one of them can be overridden from the
/// run file.
///
/// - `Function`: a function host started through its core tools (`func host
///   start`). Has an extension install step and a JDWP debug agent.
/// - `Container`: a container started through a docker-compatible CLI.
///   Merged settings are forwarded as `-e KEY` arguments.
/// - `Generic`: any other long-running executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostProfile {
    Function,
    Container,
    Generic,
}

impl Default for HostProfile {
    fn default() -> Self {
        HostProfile::Function
    }
}

impl fmt::Display for HostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostProfile::Function => "function",
            HostProfile::Container => "container",
            HostProfile::Generic => "generic",
        };
        f.write_str(name)
    }
}

impl HostProfile {
    /// Lines that mean "the host is up and a debugger may attach".
    pub fn default_readiness_patterns(self) -> Vec<String> {
        match self {
            HostProfile::Function => vec![
                "(?i)job host started".to_string(),
                "(?i)listening for transport dt_socket at address".to_string(),
            ],
            HostProfile::Container => vec![
                r"(?i)\b(?:server|application) started\b".to_string(),
                r"(?i)\bstarted \S+ in \d+(?:\.\d+)? seconds".to_string(),
                r"(?i)\blistening on\b.*\d+\s*$".to_string(),
            ],
            HostProfile::Generic => Vec::new(),
        }
    }

    /// Stderr lines worth reporting when the host dies.
    pub fn default_failure_patterns(self) -> Vec<String> {
        match self {
            HostProfile::Function => vec![r"Port \d+ is unavailable".to_string()],
            HostProfile::Container => vec!["(?i)address already in use".to_string()],
            HostProfile::Generic => Vec::new(),
        }
    }

    /// Arguments of the extension install helper, or `None` when the profile
    /// has no install step.
    pub fn default_install_args(self) -> Option<Vec<String>> {
        match self {
            HostProfile::Function => Some(vec![
                "extensions".to_string(),
                "install".to_string(),
                "--java".to_string(),
            ]),
            HostProfile::Container | HostProfile::Generic => None,
        }
    }

    /// Debug agent arguments appended to the host command line. `{port}` is
    /// replaced with the resolved debug port.
    pub fn default_debug_args(self) -> Vec<String> {
        match self {
            HostProfile::Function => vec![
                "--language-worker".to_string(),
                "--".to_string(),
                "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address={port}".to_string(),
            ],
            HostProfile::Container | HostProfile::Generic => Vec::new(),
        }
    }

    /// Whether the host's version is checked against the Java runtime before
    /// launch.
    pub fn checks_host_version(self) -> bool {
        matches!(self, HostProfile::Function)
    }

    /// Whether merged settings are exported into the child environment.
    ///
    /// The function host reads them from the staged `local.settings.json`
    /// instead.
    pub fn exports_settings(self) -> bool {
        !matches!(self, HostProfile::Function)
    }

    /// Whether merged settings must also be named on the command line
    /// (`-e KEY`) to reach the containerized process.
    pub fn forwards_settings_as_args(self) -> bool {
        matches!(self, HostProfile::Container)
    }
}
