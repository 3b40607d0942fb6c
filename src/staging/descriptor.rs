// src/staging/descriptor.rs

//! Static descriptor files read while staging.
//!
//! Only the fields the launcher needs are modelled; everything else in these
//! files is carried through untouched by copying the original bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::capability::Capability;
use super::manifest::ExtensionBundle;
use crate::settings::flatten_settings;

pub const HOST_CONFIG_FILE: &str = "host.json";
pub const LOCAL_SETTINGS_FILE: &str = "local.settings.json";
pub const FUNCTION_DESCRIPTOR_FILE: &str = "function.json";

/// Written when the project has no host configuration of its own.
pub const DEFAULT_HOST_CONFIG: &str = r#"{
  "version": "2.0",
  "logging": {
    "applicationInsights": {
      "samplingSettings": {
        "isEnabled": true,
        "excludedTypes": "Request"
      }
    }
  },
  "extensionBundle": {
    "id": "Microsoft.Azure.Functions.ExtensionBundle",
    "version": "[2.*, 3.0.0)"
  }
}
"#;

#[derive(Debug, Deserialize)]
struct RawHostConfig {
    #[serde(rename = "extensionBundle", default)]
    extension_bundle: Option<RawExtensionBundle>,
}

#[derive(Debug, Deserialize)]
struct RawExtensionBundle {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

/// Parse host configuration text and return its extension bundle, if any.
pub fn parse_host_config(contents: &str) -> Result<Option<ExtensionBundle>> {
    let raw: RawHostConfig = serde_json::from_str(contents).context("parsing host configuration")?;
    Ok(raw.extension_bundle.and_then(|b| {
        b.id.map(|id| ExtensionBundle {
            id,
            version: b.version,
        })
    }))
}

#[derive(Debug, Deserialize)]
struct FunctionDescriptor {
    #[serde(default)]
    bindings: Vec<BindingDescriptor>,
}

#[derive(Debug, Deserialize)]
struct BindingDescriptor {
    #[serde(rename = "type")]
    kind: String,
}

/// Collect binding types from every `<root>/<function>/function.json`.
///
/// A single-file artifact (e.g. an archive) has no descriptors and yields an
/// empty set.
pub fn scan_capabilities(root: &Path) -> Result<BTreeSet<Capability>> {
    let mut capabilities = BTreeSet::new();
    if !root.is_dir() {
        return Ok(capabilities);
    }

    for entry in fs::read_dir(root).with_context(|| format!("reading artifact dir {:?}", root))? {
        let entry = entry?;
        let descriptor = entry.path().join(FUNCTION_DESCRIPTOR_FILE);
        if !descriptor.is_file() {
            continue;
        }

        let contents = fs::read_to_string(&descriptor)
            .with_context(|| format!("reading descriptor {:?}", descriptor))?;
        let parsed: FunctionDescriptor = serde_json::from_str(&contents)
            .with_context(|| format!("parsing descriptor {:?}", descriptor))?;

        for binding in parsed.bindings {
            debug!(descriptor = ?descriptor, binding = %binding.kind, "declared binding");
            capabilities.insert(Capability::new(&binding.kind));
        }
    }

    Ok(capabilities)
}

/// `local.settings.json` contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(rename = "IsEncrypted", default)]
    pub is_encrypted: bool,

    #[serde(rename = "Values", default)]
    pub values: BTreeMap<String, Value>,

    #[serde(
        rename = "ConnectionStrings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_strings: Option<Value>,
}

impl LocalSettings {
    pub fn parse(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("parsing local settings")
    }

    /// `Values` as plain strings.
    pub fn string_values(&self) -> BTreeMap<String, String> {
        let as_object = Value::Object(self.values.clone().into_iter().collect());
        flatten_settings(&as_object)
    }

    /// Build the staged file from merged values, keeping connection strings.
    pub fn staged(&self, merged: &BTreeMap<String, String>) -> Self {
        Self {
            is_encrypted: false,
            values: merged
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
            connection_strings: self.connection_strings.clone(),
        }
    }
}
