// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawRunFile, RunFile};
use crate::errors::{HostrunError, Result};

/// Read and deserialize a run file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRunFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        HostrunError::ConfigError(format!("cannot read run file {}: {e}", path.display()))
    })?;

    let raw: RawRunFile = toml::from_str(&contents)?;
    Ok(raw)
}

/// Load, validate and resolve relative paths against the file's directory.
///
/// This is the entry point the CLI uses.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<RunFile> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let run_file = RunFile::try_from(raw)?;
    Ok(run_file.with_base_dir(&config_base_dir(path)))
}

/// `Hostrun.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Hostrun.toml")
}

/// Directory relative paths in a run file are resolved against.
///
/// A bare file name (`Hostrun.toml`) has an empty parent; use the current
/// working directory then.
pub fn config_base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
