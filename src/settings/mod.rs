// src/settings/mod.rs

//! Persisted settings store abstraction.
//!
//! The preparer looks up previously saved app settings by a key (the run
//! configuration's settings key). Absence is never an error: a missing key, a
//! missing file or an unreadable entry all mean "no value".

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

pub mod memory;

pub use memory::MemorySettingsStore;

/// Key/value settings persisted outside the project.
pub trait SettingsStore: Send + Sync + Debug {
    /// Return the settings stored under `key`, or an empty map.
    fn load(&self, key: &str) -> BTreeMap<String, String>;
}

/// Store that never has anything. Used when no store is configured.
#[derive(Debug, Clone, Default)]
pub struct EmptySettingsStore;

impl SettingsStore for EmptySettingsStore {
    fn load(&self, _key: &str) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Store backed by a JSON file of the shape:
///
/// ```json
/// {
///   "my-app": { "AzureWebJobsStorage": "UseDevelopmentStorage=true" },
///   "other":  "{\"FOO\":\"bar\"}"
/// }
/// ```
///
/// Entries may be objects or JSON-encoded strings of objects (the latter is
/// how a credential store keeps them). Non-string scalar values are
/// stringified.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_load(&self, key: &str) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "settings store file does not exist");
            return Ok(BTreeMap::new());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading settings store {:?}", self.path))?;
        let root: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parsing settings store {:?}", self.path))?;

        let entry = match root.get(key) {
            Some(v) => v.clone(),
            None => return Ok(BTreeMap::new()),
        };

        let entry = match entry {
            Value::String(s) if s.trim().is_empty() => return Ok(BTreeMap::new()),
            Value::String(s) => serde_json::from_str::<Value>(&s)
                .with_context(|| format!("parsing encoded entry '{key}'"))?,
            other => other,
        };

        Ok(flatten_settings(&entry))
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self, key: &str) -> BTreeMap<String, String> {
        match self.try_load(key) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    path = ?self.path,
                    key,
                    error = %e,
                    "settings store entry unreadable; treating as empty"
                );
                BTreeMap::new()
            }
        }
    }
}

/// Turn a JSON object into a string map. Nulls are dropped, other scalars are
/// rendered with their JSON text.
pub(crate) fn flatten_settings(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Value::Object(map) = value {
        for (k, v) in map {
            match v {
                Value::Null => {}
                Value::String(s) => {
                    out.insert(k.clone(), s.clone());
                }
                other => {
                    out.insert(k.clone(), other.to_string());
                }
            }
        }
    }
    out
}
