//! AudioRequest type for a single separation request.
//!
//! An AudioRequest is parsed from the raw request body and carries the
//! absolute path of the source audio for the lifetime of one request.

use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};

/// A request to separate one audio file.
///
/// Immutable once accepted. The `request_id` is only used to correlate log
/// lines belonging to the same request.
#[derive(Debug, Clone)]
pub struct AudioRequest {
    /// Random identifier (UUID v4) for log correlation.
    pub request_id: String,

    /// Absolute path to the source audio file.
    source_path: PathBuf,
}

impl AudioRequest {
    /// Creates a request for the given caller-supplied path.
    ///
    /// A leading `~` is expanded to the user's home directory and relative
    /// paths are made absolute against the current working directory.
    pub fn new(raw_path: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            source_path: absolutize(expand_user(raw_path)),
        }
    }

    /// Parses a request from a raw JSON body.
    ///
    /// The body must be a JSON object with a string `path` field. The content
    /// type of the original HTTP request is not consulted.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| {
            ServiceError::invalid_input(format!("Request body is not valid JSON: {}", e))
        })?;

        let path = value
            .as_object()
            .and_then(|object| object.get("path"))
            .ok_or_else(ServiceError::missing_path)?;

        let path = path
            .as_str()
            .ok_or_else(|| ServiceError::invalid_input("'path' must be a string"))?;

        if path.trim().is_empty() {
            return Err(ServiceError::invalid_input("'path' must not be empty"));
        }

        Ok(Self::new(path))
    }

    /// Returns the absolute path of the source audio.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Resolves symlinks and `..` components once the file is known to exist.
    ///
    /// Keeps the unresolved path if canonicalization fails.
    pub fn canonicalize(mut self) -> Self {
        if let Ok(resolved) = std::fs::canonicalize(&self.source_path) {
            self.source_path = resolved;
        }
        self
    }
}

/// Expands a leading `~` to the current user's home directory.
fn expand_user(raw: &str) -> PathBuf {
    let rest = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/")
    };

    match (rest, directories::BaseDirs::new()) {
        (Some(rest), Some(base)) if rest.is_empty() => base.home_dir().to_path_buf(),
        (Some(rest), Some(base)) => base.home_dir().join(rest),
        _ => PathBuf::from(raw),
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}
