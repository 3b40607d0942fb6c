// src/staging/dir.rs

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

/// Exclusive owner of one run's staging directory.
///
/// The directory is removed by [`StagingDir::remove`] or, as a last resort,
/// when the guard is dropped.
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    /// Create a fresh, uniquely named directory under the system temp dir.
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("hostrun-").tempdir()?;
        debug!(path = ?dir.path(), "created staging directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the directory and everything in it.
    pub fn remove(self) -> io::Result<()> {
        let path: PathBuf = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => {
                debug!(path = ?path, "removed staging directory");
                Ok(())
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "failed to remove staging directory");
                Err(e)
            }
        }
    }
}
