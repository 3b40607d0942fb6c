// src/config/mod.rs

//! Run file loading and validation.
//!
//! - `model.rs`: the TOML-backed data model (`RawRunFile`, `RunFile`).
//! - `loader.rs`: reading a run file from disk.
//! - `validate.rs`: `RawRunFile → RunFile` checks and the conversion into a
//!   [`RunSpec`](crate::coordinator::RunSpec).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_base_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{
    ArtifactSection, DebugSection, HostSection, InstallSection, PreflightSection, RawDebugPort,
    RawDebugSection, RawRunFile, RunFile, SecretsSection, SignalsSection,
};
