// src/staging/capability.rs

//! Capability (binding/trigger type) classification.

use std::fmt;

/// App setting holding the storage connection most triggers need.
pub const STORAGE_SETTING_KEY: &str = "AzureWebJobsStorage";

/// Capabilities served by the host itself, without an extension install.
const NO_INSTALL_CAPABILITIES: &[&str] = &["httptrigger", "http"];

/// Triggers that run without the storage setting.
const STORAGE_FREE_TRIGGERS: &[&str] = &[
    "httptrigger",
    "kafkatrigger",
    "rabbitmqtrigger",
    "orchestrationtrigger",
    "activitytrigger",
    "entitytrigger",
];

/// A declared binding or trigger type, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capability(String);

impl Capability {
    pub fn new(kind: &str) -> Self {
        Capability(kind.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_trigger(&self) -> bool {
        self.0.ends_with("trigger")
    }

    /// True if the host can serve this capability without installing an
    /// extension bundle.
    pub fn needs_no_install(&self) -> bool {
        NO_INSTALL_CAPABILITIES.contains(&self.0.as_str())
    }

    /// True if this is a trigger that cannot run without the storage setting.
    pub fn requires_storage(&self) -> bool {
        self.is_trigger() && !STORAGE_FREE_TRIGGERS.contains(&self.0.as_str())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        Capability::new(s)
    }
}
