// src/staging/manifest.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::capability::Capability;

/// Extension bundle reference declared in the host configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionBundle {
    pub id: String,
    pub version: Option<String>,
}

impl ExtensionBundle {
    /// A bundle with an identifier ships its own extensions, so nothing needs
    /// to be installed next to the app.
    pub fn is_self_contained(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// A setting that is absent from the merged configuration.
///
/// `required_by` lists the declared capabilities that cannot work without it.
/// When it is empty the absence is informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSetting {
    pub key: String,
    pub required_by: Vec<Capability>,
}

impl MissingSetting {
    pub fn is_blocking(&self) -> bool {
        !self.required_by.is_empty()
    }
}

/// Result of staging: everything the installer and supervisor read.
///
/// Built once by the preparer and never mutated afterwards, hence no setters.
#[derive(Debug, Clone)]
pub struct StagingManifest {
    root: PathBuf,
    settings: BTreeMap<String, String>,
    capabilities: BTreeSet<Capability>,
    extension_bundle: Option<ExtensionBundle>,
    missing_settings: Vec<MissingSetting>,
}

impl StagingManifest {
    pub(crate) fn new(
        root: PathBuf,
        settings: BTreeMap<String, String>,
        capabilities: BTreeSet<Capability>,
        extension_bundle: Option<ExtensionBundle>,
        missing_settings: Vec<MissingSetting>,
    ) -> Self {
        Self {
            root,
            settings,
            capabilities,
            extension_bundle,
            missing_settings,
        }
    }

    /// Root of the materialized layout (the staging directory).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Merged settings, highest precedence already applied.
    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn extension_bundle(&self) -> Option<&ExtensionBundle> {
        self.extension_bundle.as_ref()
    }

    pub fn missing_settings(&self) -> &[MissingSetting] {
        &self.missing_settings
    }

    /// Missing settings that some declared capability cannot run without.
    pub fn blocking_missing_settings(&self) -> impl Iterator<Item = &MissingSetting> {
        self.missing_settings.iter().filter(|m| m.is_blocking())
    }

    /// Compare everything except the staging root.
    pub fn same_content(&self, other: &StagingManifest) -> bool {
        self.settings == other.settings
            && self.capabilities == other.capabilities
            && self.extension_bundle == other.extension_bundle
            && self.missing_settings == other.missing_settings
    }
}
