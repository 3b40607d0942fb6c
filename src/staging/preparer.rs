// src/staging/preparer.rs

//! Materializes the per-run staging directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::capability::{Capability, STORAGE_SETTING_KEY};
use super::descriptor::{
    DEFAULT_HOST_CONFIG, HOST_CONFIG_FILE, LOCAL_SETTINGS_FILE, LocalSettings,
    parse_host_config, scan_capabilities,
};
use super::dir::StagingDir;
use super::manifest::{ExtensionBundle, MissingSetting, StagingManifest};
use crate::errors::HostrunError;
use crate::settings::SettingsStore;

/// Where the build output and its static configuration live.
#[derive(Debug, Clone)]
pub struct ProjectArtifacts {
    /// Build output: a directory (copied recursively) or a single file.
    pub root: PathBuf,
    /// Host configuration; defaults to `<root>/host.json` when present.
    pub host_config: Option<PathBuf>,
    /// File-based settings defaults; defaults to `<root>/local.settings.json`
    /// when present.
    pub local_settings: Option<PathBuf>,
}

impl ProjectArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host_config: None,
            local_settings: None,
        }
    }
}

/// Configuration declared by the run itself.
#[derive(Debug, Clone, Default)]
pub struct DeclaredConfig {
    /// Explicit run settings; highest precedence.
    pub settings: BTreeMap<String, String>,
    /// Lookup key for the persisted settings store.
    pub settings_key: Option<String>,
    /// Capabilities declared in addition to what descriptors say.
    pub capabilities: Vec<String>,
}

/// A manifest together with the directory it describes.
#[derive(Debug)]
pub struct PreparedStaging {
    pub manifest: StagingManifest,
    pub dir: StagingDir,
}

#[derive(Clone)]
pub struct StagingDirectoryPreparer {
    store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for StagingDirectoryPreparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingDirectoryPreparer")
            .field("store", &self.store)
            .finish()
    }
}

impl StagingDirectoryPreparer {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Build a fresh staging directory and its manifest.
    ///
    /// Any failure is a [`HostrunError::Preparation`]; the half-built
    /// directory is removed before returning.
    pub fn prepare(
        &self,
        artifacts: &ProjectArtifacts,
        declared: &DeclaredConfig,
    ) -> crate::errors::Result<PreparedStaging> {
        self.prepare_inner(artifacts, declared)
            .map_err(|e| HostrunError::Preparation(format!("{e:#}")))
    }

    fn prepare_inner(
        &self,
        artifacts: &ProjectArtifacts,
        declared: &DeclaredConfig,
    ) -> Result<PreparedStaging> {
        let root = &artifacts.root;
        let meta = fs::metadata(root)
            .with_context(|| format!("build artifact {:?} is not accessible", root))?;

        let dir = StagingDir::create().context("creating staging directory")?;
        let staging = dir.path().to_path_buf();

        info!(artifact = ?root, staging = ?staging, "preparing staging directory");

        if meta.is_dir() {
            copy_dir_recursive(root, &staging)?;
        } else {
            let name = root
                .file_name()
                .with_context(|| format!("artifact path {:?} has no file name", root))?;
            fs::copy(root, staging.join(name))
                .with_context(|| format!("copying artifact {:?}", root))?;
        }

        let extension_bundle = stage_host_config(artifacts, &staging)?;

        let mut capabilities = scan_capabilities(root)?;
        for declared_cap in &declared.capabilities {
            capabilities.insert(Capability::new(declared_cap));
        }
        debug!(?capabilities, "computed capabilities");

        let defaults = load_local_settings(artifacts)?;
        let persisted = match declared.settings_key.as_deref() {
            Some(key) if !key.trim().is_empty() => self.store.load(key),
            _ => BTreeMap::new(),
        };
        let settings = merge_settings(&defaults.string_values(), &persisted, &declared.settings);

        let staged = defaults.staged(&settings);
        let staged_json = serde_json::to_string_pretty(&staged).context("encoding local settings")?;
        fs::write(staging.join(LOCAL_SETTINGS_FILE), staged_json)
            .context("writing staged local settings")?;

        let missing_settings = find_missing_settings(&settings, &capabilities);
        for missing in &missing_settings {
            let required_by: Vec<&str> = missing.required_by.iter().map(|c| c.as_str()).collect();
            warn!(
                key = %missing.key,
                ?required_by,
                blocking = missing.is_blocking(),
                "setting is not configured"
            );
        }

        let manifest = StagingManifest::new(
            staging,
            settings,
            capabilities,
            extension_bundle,
            missing_settings,
        );

        Ok(PreparedStaging { manifest, dir })
    }
}

/// Merge the three settings layers. Later layers win.
pub fn merge_settings(
    file_defaults: &BTreeMap<String, String>,
    persisted: &BTreeMap<String, String>,
    explicit: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = file_defaults.clone();
    merged.extend(persisted.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn find_missing_settings(
    settings: &BTreeMap<String, String>,
    capabilities: &BTreeSet<Capability>,
) -> Vec<MissingSetting> {
    let has_storage = settings
        .get(STORAGE_SETTING_KEY)
        .is_some_and(|v| !v.trim().is_empty());
    if has_storage {
        return Vec::new();
    }

    vec![MissingSetting {
        key: STORAGE_SETTING_KEY.to_string(),
        required_by: capabilities
            .iter()
            .filter(|c| c.requires_storage())
            .cloned()
            .collect(),
    }]
}

/// Put `host.json` into the staging root and return its bundle reference.
fn stage_host_config(artifacts: &ProjectArtifacts, staging: &Path) -> Result<Option<ExtensionBundle>> {
    let target = staging.join(HOST_CONFIG_FILE);
    let source = match &artifacts.host_config {
        Some(p) => Some(p.clone()),
        None => {
            let candidate = artifacts.root.join(HOST_CONFIG_FILE);
            candidate.is_file().then_some(candidate)
        }
    };

    let contents = match source {
        Some(path) => {
            if !path.is_file() {
                bail!("host configuration {:?} does not exist", path);
            }
            fs::read_to_string(&path).with_context(|| format!("reading host configuration {:?}", path))?
        }
        None => {
            debug!("no host configuration found; writing default");
            DEFAULT_HOST_CONFIG.to_string()
        }
    };

    let bundle = parse_host_config(&contents)?;
    fs::write(&target, &contents).context("writing staged host configuration")?;
    Ok(bundle)
}

fn load_local_settings(artifacts: &ProjectArtifacts) -> Result<LocalSettings> {
    let source = match &artifacts.local_settings {
        Some(p) => Some(p.clone()),
        None => {
            let candidate = artifacts.root.join(LOCAL_SETTINGS_FILE);
            candidate.is_file().then_some(candidate)
        }
    };

    match source {
        Some(path) if path.is_file() => {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading local settings {:?}", path))?;
            LocalSettings::parse(&contents).with_context(|| format!("in {:?}", path))
        }
        Some(path) => {
            debug!(path = ?path, "local settings file not found; using empty defaults");
            Ok(LocalSettings::default())
        }
        None => Ok(LocalSettings::default()),
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("creating dir {:?}", dst))?;

    for entry in fs::read_dir(src).with_context(|| format!("reading dir {:?}", src))? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        // Follow symlinks so linked build outputs are materialized.
        let meta = fs::metadata(&from).with_context(|| format!("reading metadata of {:?}", from))?;
        if meta.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to).with_context(|| format!("copying {:?}", from))?;
        }
    }

    Ok(())
}
