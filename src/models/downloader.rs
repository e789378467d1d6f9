//! Checkpoint provisioning.
//!
//! Makes sure the checkpoint for a model spec is present in the model
//! directory, downloading it if a URL is configured, and optionally
//! verifies its SHA-256 digest.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Result, ServiceError};

use super::registry::ModelSpec;

/// Where and how to obtain a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CheckpointSource {
    /// Directory the checkpoint lives in.
    pub model_dir: PathBuf,
    /// Download URL used when the file is missing.
    pub url: Option<String>,
    /// Expected SHA-256 digest, lowercase hex.
    pub sha256: Option<String>,
}

/// Returns the path of a present, verified checkpoint for `spec`.
///
/// Blocking. Missing file without a URL, download failure and digest
/// mismatch are initialization errors.
pub fn ensure_checkpoint(spec: &ModelSpec, source: &CheckpointSource) -> Result<PathBuf> {
    let path = source.model_dir.join(spec.checkpoint_file);

    if !path.is_file() {
        let Some(url) = source.url.as_deref() else {
            return Err(ServiceError::checkpoint_not_found(&path));
        };

        if !source.model_dir.exists() {
            fs::create_dir_all(&source.model_dir).map_err(|e| {
                ServiceError::initialization_failed(format!(
                    "Failed to create model directory {}: {}",
                    source.model_dir.display(),
                    e
                ))
            })?;
        }

        tracing::info!(
            model = spec.name,
            url,
            dest = %path.display(),
            "Checkpoint missing, downloading (this may take several minutes)"
        );
        download_file_streaming(url, &path)?;
    }

    if let Some(expected) = source.sha256.as_deref() {
        verify_sha256(&path, expected)?;
    }

    Ok(path)
}

/// Checks the SHA-256 digest of `path` against `expected` (hex, any case).
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        tracing::debug!(path = %path.display(), "Checkpoint digest verified");
        Ok(())
    } else {
        Err(ServiceError::initialization_failed(format!(
            "checkpoint digest mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )))
    }
}

/// Computes the lowercase hex SHA-256 of a file.
fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| {
        ServiceError::initialization_failed(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let n = file.read(&mut buffer).map_err(|e| {
            ServiceError::initialization_failed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Downloads a file using streaming to handle large files.
///
/// Writes to a `.part` file first so an interrupted download never looks
/// like a complete checkpoint.
fn download_file_streaming(url: &str, dest: &Path) -> Result<()> {
    let partial = dest.with_extension("part");

    // Create a client with longer timeout for large files
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(3600))
        .build()
        .map_err(|e| {
            ServiceError::initialization_failed(format!("Failed to create HTTP client: {}", e))
        })?;

    let mut response = client.get(url).send().map_err(|e| {
        ServiceError::initialization_failed(format!("Failed to download {}: {}", url, e))
    })?;

    if !response.status().is_success() {
        return Err(ServiceError::initialization_failed(format!(
            "HTTP {} for {}",
            response.status(),
            url
        )));
    }

    let total_size = response.content_length().unwrap_or(0);

    let mut file = fs::File::create(&partial).map_err(|e| {
        ServiceError::initialization_failed(format!(
            "Failed to create file {}: {}",
            partial.display(),
            e
        ))
    })?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 65536];
    let mut last_progress = 0;

    let result: Result<()> = loop {
        let bytes_read = match response.read(&mut buffer) {
            Ok(n) => n,
            Err(e) => {
                break Err(ServiceError::initialization_failed(format!(
                    "Failed to read response: {}",
                    e
                )))
            }
        };

        if bytes_read == 0 {
            break Ok(());
        }

        if let Err(e) = file.write_all(&buffer[..bytes_read]) {
            break Err(ServiceError::initialization_failed(format!(
                "Failed to write file: {}",
                e
            )));
        }

        downloaded += bytes_read as u64;

        // Log progress every 10%
        if total_size > 0 {
            let progress = (downloaded * 100 / total_size) as usize;
            if progress >= last_progress + 10 {
                tracing::info!(progress_pct = progress, "Downloading checkpoint");
                last_progress = progress;
            }
        }
    };

    drop(file);

    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    fs::rename(&partial, dest).map_err(|e| {
        ServiceError::initialization_failed(format!(
            "Failed to move {} into place: {}",
            partial.display(),
            e
        ))
    })?;

    tracing::info!(
        dest = %dest.display(),
        size_mb = downloaded as f64 / (1024.0 * 1024.0),
        "Download complete"
    );

    Ok(())
}
