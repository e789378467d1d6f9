//! WAV reading and writing for the separation model.
//!
//! Uses the hound crate. Stems are written as mono 32-bit float.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{Result, ServiceError};

/// Decoded mono audio.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    /// Samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl MonoAudio {
    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// Reads a WAV file as mono f32.
///
/// Multi-channel input is down-mixed by averaging channels. Integer formats
/// are scaled to [-1.0, 1.0].
pub fn read_mono_f32(path: &Path) -> Result<MonoAudio> {
    let mut reader = WavReader::open(path).map_err(|e| {
        ServiceError::inference_failed(format!("Failed to open WAV {}: {}", path.display(), e))
    })?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ServiceError::inference_failed(format!("Failed to read sample: {}", e)))?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| {
                    ServiceError::inference_failed(format!("Failed to read sample: {}", e))
                })?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Writes mono samples to a 32-bit float WAV file.
pub fn write_wav_mono_f32(samples: &[f32], path: &Path, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec).map_err(|e| {
        ServiceError::inference_failed(format!("Failed to create WAV file: {}", e))
    })?;

    for sample in samples {
        writer.write_sample(*sample).map_err(|e| {
            ServiceError::inference_failed(format!("Failed to write sample: {}", e))
        })?;
    }

    writer.finalize().map_err(|e| {
        ServiceError::inference_failed(format!("Failed to finalize WAV file: {}", e))
    })?;

    Ok(())
}

/// Calculates the duration of audio in seconds from sample count.
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> f32 {
    sample_count as f32 / sample_rate as f32
}
