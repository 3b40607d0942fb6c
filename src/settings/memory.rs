// src/settings/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::SettingsStore;

/// In-memory settings store, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    entries: Arc<Mutex<HashMap<String, BTreeMap<String, String>>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, settings: BTreeMap<String, String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.into(), settings);
    }

    pub fn with_entry(self, key: &str, pairs: &[(&str, &str)]) -> Self {
        let settings = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.insert(key, settings);
        self
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, key: &str) -> BTreeMap<String, String> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(key).cloned().unwrap_or_default()
    }
}
