// src/staging/mod.rs

//! Staging directory preparation.
//!
//! - [`preparer`] copies the artifact into a fresh directory, stages the host
//!   configuration and writes the merged local settings.
//! - [`descriptor`] reads `host.json`, `local.settings.json` and the
//!   per-function `function.json` descriptors.
//! - [`capability`] classifies declared binding types.
//! - [`manifest`] is the immutable result handed to the rest of the run.
//! - [`dir`] owns the temporary directory itself.

pub mod capability;
pub mod descriptor;
pub mod dir;
pub mod manifest;
pub mod preparer;

pub use capability::{Capability, STORAGE_SETTING_KEY};
pub use dir::StagingDir;
pub use manifest::{ExtensionBundle, MissingSetting, StagingManifest};
pub use preparer::{
    DeclaredConfig, PreparedStaging, ProjectArtifacts, StagingDirectoryPreparer, merge_settings,
};
