// src/coordinator/spec.rs

//! Immutable description of one run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{HostrunError, Result};
use crate::process::CommandLine;
use crate::staging::{DeclaredConfig, ProjectArtifacts, StagingManifest};
use crate::stream::{FailureSignal, ReadinessSignal};
use crate::types::HostProfile;

use super::debug::DebugConfig;
use super::preflight::VersionPreflight;

/// Argument token replaced by `-e KEY` pairs for every merged setting.
pub const SETTINGS_ENV_TOKEN: &str = "{settings_env}";

/// Argument token replaced by the staging directory path.
pub const STAGING_TOKEN: &str = "{staging}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSpec {
    pub enabled: bool,
    /// Helper executable; the host executable when `None`.
    pub tool: Option<PathBuf>,
    pub args: Vec<String>,
}

impl InstallSpec {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tool: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSpec {
    pub profile: HostProfile,
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Applied over the inherited environment (and over exported settings).
    pub env: BTreeMap<String, String>,
    pub artifacts: ProjectArtifacts,
    pub declared: DeclaredConfig,
    pub install: InstallSpec,
    pub debug: DebugConfig,
    /// Host version check before launch; `None` skips it.
    pub preflight: Option<VersionPreflight>,
    pub readiness: ReadinessSignal,
    pub failure: FailureSignal,
}

impl RunSpec {
    /// A spec with every default the profile provides.
    ///
    /// Fails only if a built-in pattern does not compile.
    pub fn for_profile(
        profile: HostProfile,
        executable: impl Into<PathBuf>,
        artifacts: ProjectArtifacts,
    ) -> Result<Self> {
        let readiness = ReadinessSignal::new(profile.default_readiness_patterns())
            .map_err(|e| HostrunError::ConfigError(format!("readiness pattern: {e}")))?;
        let failure = FailureSignal::new(profile.default_failure_patterns())
            .map_err(|e| HostrunError::ConfigError(format!("failure pattern: {e}")))?;

        let install = match profile.default_install_args() {
            Some(args) => InstallSpec {
                enabled: true,
                tool: None,
                args,
            },
            None => InstallSpec::disabled(),
        };

        let executable = executable.into();
        let args = match profile {
            HostProfile::Function => vec!["host".to_string(), "start".to_string()],
            HostProfile::Container | HostProfile::Generic => Vec::new(),
        };

        Ok(Self {
            profile,
            executable,
            args,
            env: BTreeMap::new(),
            artifacts,
            declared: DeclaredConfig::default(),
            install,
            debug: DebugConfig {
                enabled: false,
                port: Default::default(),
                agent_args: profile.default_debug_args(),
            },
            preflight: profile.checks_host_version().then(VersionPreflight::default),
            readiness,
            failure,
        })
    }

    /// Command line of the primary host process.
    ///
    /// `debug_port` is `Some` only when debugging was requested and a port
    /// was resolved.
    pub fn host_command(&self, manifest: &StagingManifest, debug_port: Option<u16>) -> CommandLine {
        let staging = manifest.root().display().to_string();
        let forwarded = if self.profile.forwards_settings_as_args() {
            settings_env_args(manifest.settings())
        } else {
            Vec::new()
        };

        let mut args = Vec::with_capacity(self.args.len() + forwarded.len());
        let mut forwarded_placed = false;
        for arg in &self.args {
            if arg == SETTINGS_ENV_TOKEN {
                args.extend(forwarded.iter().cloned());
                forwarded_placed = true;
            } else {
                args.push(arg.replace(STAGING_TOKEN, &staging));
            }
        }

        // Without a token, forwarded settings go right after the subcommand
        // (`docker run -e K ... image`).
        if !forwarded_placed && !forwarded.is_empty() {
            let at = args.len().min(1);
            args.splice(at..at, forwarded);
        }

        if let Some(port) = debug_port {
            args.extend(self.debug.agent_args_for(port));
        }

        let mut env = BTreeMap::new();
        if self.profile.exports_settings() {
            env.extend(manifest.settings().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        CommandLine::new("host", self.executable.clone()).args(args).env(&env)
    }

    /// Command line of the extension install helper, if the step is enabled.
    pub fn install_command(&self) -> Option<CommandLine> {
        if !self.install.enabled {
            return None;
        }

        let tool = self.install.tool.as_deref().unwrap_or(self.executable.as_path());
        Some(
            CommandLine::new("extension-install", tool.to_path_buf())
                .args(self.install.args.iter().cloned())
                .env(&self.env),
        )
    }
}

fn settings_env_args(settings: &BTreeMap<String, String>) -> Vec<String> {
    settings
        .keys()
        .flat_map(|key| ["-e".to_string(), key.clone()])
        .collect()
}
