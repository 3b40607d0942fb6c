// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::HostProfile;

/// Run file as read from TOML, before validation.
///
/// ```toml
/// [host]
/// profile = "function"
/// executable = "func"
///
/// [artifact]
/// root = "target/azure-functions/my-app"
///
/// [settings]
/// FUNCTIONS_WORKER_RUNTIME = "java"
///
/// [secrets]
/// path = "secrets.json"
/// key = "my-app"
///
/// [debug]
/// enabled = true
/// port = "auto"
///
/// [preflight]
/// java = "/usr/lib/jvm/java-17/bin/java"
/// ```
///
/// Only `[host].executable` and `[artifact].root` are required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRunFile {
    pub host: HostSection,

    pub artifact: ArtifactSection,

    /// Explicit settings; highest precedence in the merged map.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    #[serde(default)]
    pub secrets: Option<SecretsSection>,

    #[serde(default)]
    pub install: InstallSection,

    #[serde(default)]
    pub debug: RawDebugSection,

    #[serde(default)]
    pub signals: SignalsSection,

    #[serde(default)]
    pub preflight: PreflightSection,
}

/// `[host]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    #[serde(default)]
    pub profile: HostProfile,

    pub executable: String,

    /// Replaces the profile's default arguments when set.
    #[serde(default)]
    pub args: Option<Vec<String>>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[artifact]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSection {
    pub root: PathBuf,

    #[serde(default)]
    pub host_config: Option<PathBuf>,

    #[serde(default)]
    pub local_settings: Option<PathBuf>,

    /// Added to the capabilities found in descriptors.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// `[secrets]` section: where persisted settings live.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsSection {
    pub path: PathBuf,
    pub key: String,
}

/// `[install]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallSection {
    /// `None` follows the profile.
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub tool: Option<PathBuf>,

    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// `port = 5005` or `port = "auto"`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawDebugPort {
    Number(i64),
    Word(String),
}

/// `[debug]` section, port not yet checked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDebugSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub port: Option<RawDebugPort>,

    /// First port probed when `port = "auto"`.
    #[serde(default)]
    pub auto_start: Option<i64>,

    #[serde(default)]
    pub agent_args: Option<Vec<String>>,

    /// Debugger front-end started once the host is ready, e.g.
    /// `["jdb", "-attach", "localhost:{port}"]`.
    #[serde(default)]
    pub attach_command: Option<Vec<String>>,
}

/// `[signals]` section. Lists replace the profile defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalsSection {
    #[serde(default)]
    pub ready: Option<Vec<String>>,

    #[serde(default)]
    pub failure: Option<Vec<String>>,
}

/// `[preflight]` section: host version check before launch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreflightSection {
    /// `None` follows the profile.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Java launcher whose version decides the minimum host version.
    #[serde(default)]
    pub java: Option<PathBuf>,
}

/// Validated run file.
///
/// Built through `RunFile::try_from(raw)`; paths are still as written until
/// [`with_base_dir`](Self::with_base_dir) resolves them.
#[derive(Debug, Clone)]
pub struct RunFile {
    pub host: HostSection,
    pub artifact: ArtifactSection,
    pub settings: BTreeMap<String, String>,
    pub secrets: Option<SecretsSection>,
    pub install: InstallSection,
    pub debug: DebugSection,
    pub signals: SignalsSection,
    pub preflight: PreflightSection,
}

/// `[debug]` after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSection {
    pub enabled: bool,
    pub port: crate::coordinator::DebugPort,
    pub agent_args: Option<Vec<String>>,
    pub attach_command: Option<Vec<String>>,
}

impl RunFile {
    pub(crate) fn new_unchecked(raw: RawRunFile, debug: DebugSection) -> Self {
        Self {
            host: raw.host,
            artifact: raw.artifact,
            settings: raw.settings,
            secrets: raw.secrets,
            install: raw.install,
            debug,
            signals: raw.signals,
            preflight: raw.preflight,
        }
    }
}
