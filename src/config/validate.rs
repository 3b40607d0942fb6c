// src/config/validate.rs

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::model::{DebugSection, RawDebugPort, RawDebugSection, RawRunFile, RunFile};
use crate::coordinator::{DEFAULT_DEBUG_PORT, DebugPort, InstallSpec, RunSpec, VersionPreflight};
use crate::errors::{HostrunError, Result};
use crate::staging::{DeclaredConfig, ProjectArtifacts};
use crate::stream::LineSignal;

impl TryFrom<RawRunFile> for RunFile {
    type Error = HostrunError;

    fn try_from(raw: RawRunFile) -> std::result::Result<Self, Self::Error> {
        validate_host(&raw)?;
        validate_artifact(&raw)?;
        validate_secrets(&raw)?;
        validate_signals(&raw)?;
        let debug = validate_debug(&raw.debug)?;
        Ok(RunFile::new_unchecked(raw, debug))
    }
}

fn validate_host(cfg: &RawRunFile) -> Result<()> {
    if cfg.host.executable.trim().is_empty() {
        return Err(HostrunError::ConfigError(
            "[host].executable must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_artifact(cfg: &RawRunFile) -> Result<()> {
    if cfg.artifact.root.as_os_str().is_empty() {
        return Err(HostrunError::ConfigError(
            "[artifact].root must not be empty".to_string(),
        ));
    }
    for cap in &cfg.artifact.capabilities {
        if cap.trim().is_empty() {
            return Err(HostrunError::ConfigError(
                "[artifact].capabilities must not contain empty entries".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_secrets(cfg: &RawRunFile) -> Result<()> {
    if let Some(secrets) = &cfg.secrets {
        if secrets.key.trim().is_empty() {
            return Err(HostrunError::ConfigError(
                "[secrets].key must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_signals(cfg: &RawRunFile) -> Result<()> {
    let lists = [
        ("ready", cfg.signals.ready.as_deref()),
        ("failure", cfg.signals.failure.as_deref()),
    ];

    for (name, patterns) in lists {
        for pattern in patterns.unwrap_or_default() {
            Regex::new(pattern).map_err(|e| {
                HostrunError::ConfigError(format!(
                    "[signals].{name}: invalid pattern '{pattern}': {e}"
                ))
            })?;
        }
    }
    Ok(())
}

fn validate_debug(raw: &RawDebugSection) -> Result<DebugSection> {
    let auto_start = match raw.auto_start {
        Some(n) => port_number(n, "[debug].auto_start")?,
        None => DEFAULT_DEBUG_PORT,
    };

    let port = match &raw.port {
        None => DebugPort::Auto { start: auto_start },
        Some(RawDebugPort::Number(n)) => DebugPort::Fixed(port_number(*n, "[debug].port")?),
        Some(RawDebugPort::Word(w)) if w.trim().eq_ignore_ascii_case("auto") => {
            DebugPort::Auto { start: auto_start }
        }
        Some(RawDebugPort::Word(w)) => {
            return Err(HostrunError::ConfigError(format!(
                "[debug].port must be a port number or \"auto\" (got \"{w}\")"
            )));
        }
    };

    if let Some(cmd) = &raw.attach_command {
        if cmd.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(HostrunError::ConfigError(
                "[debug].attach_command must name a program".to_string(),
            ));
        }
    }

    Ok(DebugSection {
        enabled: raw.enabled,
        port,
        agent_args: raw.agent_args.clone(),
        attach_command: raw.attach_command.clone(),
    })
}

fn port_number(n: i64, field: &str) -> Result<u16> {
    match u16::try_from(n) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(HostrunError::ConfigError(format!(
            "{field} must be between 1 and 65535 (got {n})"
        ))),
    }
}

impl RunFile {
    /// Resolve relative paths against `base` (the run file's directory).
    ///
    /// A bare executable name such as `func` is left for `PATH` lookup.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };

        self.artifact.root = resolve(&self.artifact.root);
        self.artifact.host_config = self.artifact.host_config.as_deref().map(resolve);
        self.artifact.local_settings = self.artifact.local_settings.as_deref().map(resolve);
        if let Some(secrets) = &mut self.secrets {
            secrets.path = resolve(&secrets.path);
        }
        if let Some(tool) = &self.install.tool {
            if is_path_like(tool) {
                self.install.tool = Some(resolve(tool));
            }
        }

        if let Some(java) = &self.preflight.java {
            if is_path_like(java) {
                self.preflight.java = Some(resolve(java));
            }
        }

        let exe = PathBuf::from(&self.host.executable);
        if is_path_like(&exe) {
            self.host.executable = resolve(&exe).display().to_string();
        }
        self
    }

    /// Build the immutable run description, filling gaps from the profile.
    pub fn to_run_spec(&self) -> Result<RunSpec> {
        let profile = self.host.profile;

        let artifacts = ProjectArtifacts {
            root: self.artifact.root.clone(),
            host_config: self.artifact.host_config.clone(),
            local_settings: self.artifact.local_settings.clone(),
        };

        let mut spec = RunSpec::for_profile(profile, &self.host.executable, artifacts)?;

        if let Some(args) = &self.host.args {
            spec.args = args.clone();
        }
        spec.env = self.host.env.clone();

        spec.declared = DeclaredConfig {
            settings: self.settings.clone(),
            settings_key: self.secrets.as_ref().map(|s| s.key.clone()),
            capabilities: self.artifact.capabilities.clone(),
        };

        let install_args = self
            .install
            .args
            .clone()
            .or_else(|| profile.default_install_args());
        spec.install = match (self.install.enabled, install_args) {
            (Some(false), _) | (None, None) => InstallSpec::disabled(),
            (_, args) => InstallSpec {
                enabled: true,
                tool: self.install.tool.clone(),
                args: args.unwrap_or_default(),
            },
        };

        spec.debug.enabled = self.debug.enabled;
        spec.debug.port = self.debug.port;
        if let Some(args) = &self.debug.agent_args {
            spec.debug.agent_args = args.clone();
        }

        match self.preflight.enabled {
            Some(false) => spec.preflight = None,
            Some(true) if spec.preflight.is_none() => {
                spec.preflight = Some(VersionPreflight::default());
            }
            _ => {}
        }
        if let (Some(check), Some(java)) = (spec.preflight.as_mut(), &self.preflight.java) {
            check.java = Some(java.clone());
        }

        if let Some(ready) = &self.signals.ready {
            spec.readiness = compile(ready, "ready")?;
        }
        if let Some(failure) = &self.signals.failure {
            spec.failure = compile(failure, "failure")?;
        }

        Ok(spec)
    }
}

fn compile(patterns: &[String], name: &str) -> Result<LineSignal> {
    LineSignal::new(patterns)
        .map_err(|e| HostrunError::ConfigError(format!("[signals].{name}: {e}")))
}

fn is_path_like(p: &Path) -> bool {
    p.components().count() > 1 || p.is_absolute()
}
