//! Audio normalization through ffmpeg.
//!
//! Converts any source the external tool can decode into a WAV with a fixed
//! sample rate and channel count, truncated to a maximum duration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::audio::artifact::TempArtifact;
use crate::config::NormalizationConfig;
use crate::error::{Result, ServiceError};

/// A normalized temporary file owned by one request.
///
/// The file is deleted when this value is released or dropped.
#[derive(Debug)]
pub struct NormalizedAudio {
    artifact: TempArtifact,
}

impl NormalizedAudio {
    /// Path of the normalized WAV.
    pub fn path(&self) -> &Path {
        self.artifact.path()
    }

    /// File name without the final extension, e.g. `clip.mono8k`.
    pub fn file_stem(&self) -> String {
        self.path()
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Deletes the normalized file.
    pub fn release(self) {
        self.artifact.release();
    }
}

/// Runs ffmpeg to normalize source audio.
#[derive(Debug, Clone)]
pub struct AudioNormalizer {
    ffmpeg: PathBuf,
    target: NormalizationConfig,
}

impl AudioNormalizer {
    /// Creates a normalizer that invokes `ffmpeg` with the given targets.
    pub fn new(ffmpeg: impl Into<PathBuf>, target: NormalizationConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            target,
        }
    }

    /// Returns where the normalized copy of `source` is written.
    ///
    /// `<dir>/<stem>.<marker>.wav`, next to the source.
    pub fn output_path_for(&self, source: &Path) -> PathBuf {
        source.with_extension(format!("{}.wav", self.target.marker()))
    }

    /// Builds the ffmpeg argument list.
    pub fn ffmpeg_args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-i".into(),
            source.as_os_str().to_owned(),
            "-ac".into(),
            self.target.channels.to_string().into(),
            "-ar".into(),
            self.target.sample_rate.to_string().into(),
            "-t".into(),
            self.target.max_duration_secs.to_string().into(),
            output.as_os_str().to_owned(),
        ]
    }

    /// Normalizes `source` into a new temporary WAV.
    ///
    /// The returned value owns the file. On failure any partial output is
    /// removed before returning.
    pub async fn normalize(&self, source: &Path) -> Result<NormalizedAudio> {
        let output = self.output_path_for(source);
        let artifact = TempArtifact::new(&output);

        tracing::debug!(
            source = %source.display(),
            output = %output.display(),
            "Running ffmpeg"
        );

        let result = Command::new(&self.ffmpeg)
            .args(self.ffmpeg_args(source, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(
                    ffmpeg = %self.ffmpeg.display(),
                    error = %e,
                    "Failed to launch ffmpeg"
                );
                return Err(ServiceError::preprocessing_failed(format!(
                    "could not run {}: {}",
                    self.ffmpeg.display(),
                    e
                )));
            }
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            tracing::error!(
                source = %source.display(),
                status = %out.status,
                stderr = %stderr.trim(),
                "ffmpeg failed"
            );
            return Err(ServiceError::preprocessing_failed(format!(
                "ffmpeg exited with {}",
                out.status
            )));
        }

        if !output.is_file() {
            tracing::error!(
                output = %output.display(),
                "ffmpeg exited successfully but wrote no output"
            );
            return Err(ServiceError::preprocessing_failed(format!(
                "no output written to {}",
                output.display()
            )));
        }

        Ok(NormalizedAudio { artifact })
    }
}
