//! SeparationResult type returned by a successful request.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, ServiceError};

/// Stem files produced for one request, in ascending stem index order.
///
/// Never empty: a separation that produced no stems is an inference error.
/// The files belong to the caller; the service never deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeparationResult {
    stems: Vec<PathBuf>,
}

impl SeparationResult {
    /// Wraps already ordered, absolute stem paths.
    ///
    /// `out_dir` is only used for the error message when `stems` is empty.
    pub fn from_stems(stems: Vec<PathBuf>, out_dir: &Path) -> Result<Self> {
        if stems.is_empty() {
            return Err(ServiceError::no_output_produced(out_dir));
        }
        Ok(Self { stems })
    }

    /// Returns the stem paths in index order.
    pub fn stems(&self) -> &[PathBuf] {
        &self.stems
    }

    /// Returns the number of stems.
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Returns the stem paths as display strings.
    pub fn to_strings(&self) -> Vec<String> {
        self.stems
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect()
    }
}
