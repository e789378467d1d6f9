//! Scoped ownership of temporary files.

use std::path::{Path, PathBuf};

/// A temporary file that is deleted when released or dropped.
///
/// Deletion is delete-if-exists: a file that was never created (or already
/// removed) is not an error. Other deletion failures are logged and
/// swallowed so that cleanup never changes a request's outcome.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    released: bool,
}

impl TempArtifact {
    /// Takes ownership of `path`. The file does not have to exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    /// Returns the guarded path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file now.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed temporary file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove temporary file"
                );
            }
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}
