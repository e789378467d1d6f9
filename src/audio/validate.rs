//! Input path validation.

use std::path::Path;

use crate::config::normalize_extension;
use crate::error::{Result, ServiceError};

/// Checks that a source path is an existing file with an allowed extension.
///
/// Has no side effects and can be called any number of times.
#[derive(Debug, Clone)]
pub struct Validator {
    allowed: Vec<String>,
}

impl Validator {
    /// Creates a validator for the given extension allowlist.
    ///
    /// Entries are normalized to lowercase with a leading dot.
    pub fn new<S: AsRef<str>>(allowed: &[S]) -> Self {
        Self {
            allowed: allowed
                .iter()
                .map(|e| normalize_extension(e.as_ref()))
                .collect(),
        }
    }

    /// Returns the normalized allowlist.
    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed
    }

    /// Validates `path`.
    ///
    /// Existence is checked before the extension, so a missing file with a
    /// bad extension reports "not found".
    pub fn validate(&self, path: &Path) -> Result<()> {
        // Follows symlinks; directories and dangling links are "not found".
        let is_file = std::fs::metadata(path)
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ServiceError::file_not_found(path));
        }

        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        if !self.allowed.iter().any(|a| *a == extension) {
            return Err(ServiceError::unsupported_extension(&extension, &self.allowed));
        }

        Ok(())
    }
}
