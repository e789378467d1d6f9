//! ONNX Runtime separation model.
//!
//! Runs a single-graph speech separation checkpoint: the graph takes a
//! `[1, T]` f32 waveform and returns `[1, S, T]` (or `[S, T]`) stems.

use std::path::{Path, PathBuf};

use half::f16;
use ndarray::ArrayView2;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::audio::wav::{read_mono_f32, write_wav_mono_f32};
use crate::config::Device;
use crate::error::{Result, ServiceError};

use super::backend::{Separator, SeparatorLoader};
use super::downloader::{ensure_checkpoint, CheckpointSource};
use super::registry::ModelSpec;

/// Separation model backed by an ONNX Runtime session.
pub struct OnnxSeparator {
    session: Session,
    spec: ModelSpec,
    device: String,
}

impl std::fmt::Debug for OnnxSeparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSeparator")
            .field("model", &self.spec.name)
            .field("device", &self.device)
            .finish()
    }
}

impl OnnxSeparator {
    /// Loads the checkpoint at `checkpoint` on the requested device.
    pub fn load(
        checkpoint: &Path,
        spec: ModelSpec,
        device: Device,
        threads: Option<u32>,
    ) -> Result<Self> {
        let (device_name, providers) = select_providers(device);

        tracing::info!(
            model = spec.name,
            checkpoint = %checkpoint.display(),
            device = %device_name,
            "Loading separation model"
        );

        let mut builder = Session::builder()
            .map_err(|e| {
                ServiceError::initialization_failed(format!("Failed to create session: {}", e))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                ServiceError::initialization_failed(format!(
                    "Failed to set optimization level: {}",
                    e
                ))
            })?;

        if let Some(threads) = threads {
            builder = builder.with_intra_threads(threads as usize).map_err(|e| {
                ServiceError::initialization_failed(format!("Failed to set thread count: {}", e))
            })?;
        }

        builder = builder.with_execution_providers(providers).map_err(|e| {
            ServiceError::initialization_failed(format!(
                "Failed to set execution providers: {}",
                e
            ))
        })?;

        let session = builder.commit_from_file(checkpoint).map_err(|e| {
            ServiceError::initialization_failed(format!(
                "Failed to load {}: {}",
                checkpoint.display(),
                e
            ))
        })?;

        Ok(Self {
            session,
            spec,
            device: device_name,
        })
    }

    fn run(&mut self, samples: Vec<f32>) -> Result<Vec<Vec<f32>>> {
        let len = samples.len();
        let input = Tensor::from_array(([1usize, len], samples)).map_err(|e| {
            ServiceError::inference_failed(format!("Failed to create input tensor: {}", e))
        })?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| ServiceError::inference_failed(format!("Session run failed: {}", e)))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| ServiceError::inference_failed("model produced no outputs"))?
            .1;

        // Try f32 first, then f16
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let shape: Vec<i64> = shape.iter().copied().collect();
            return split_stems(&shape, data);
        }
        if let Ok((shape, data)) = output.try_extract_tensor::<f16>() {
            let shape: Vec<i64> = shape.iter().copied().collect();
            let data: Vec<f32> = data.iter().map(|e| f32::from(*e)).collect();
            return split_stems(&shape, &data);
        }

        Err(ServiceError::inference_failed(
            "separated output must be either f16 or f32",
        ))
    }
}

impl Separator for OnnxSeparator {
    fn separate(&mut self, mix: &Path, out_dir: &Path) -> Result<()> {
        let audio = read_mono_f32(mix)?;
        if audio.sample_rate != self.spec.sample_rate {
            return Err(ServiceError::inference_failed(format!(
                "input is {} Hz but {} expects {} Hz",
                audio.sample_rate, self.spec.name, self.spec.sample_rate
            )));
        }
        if audio.samples.is_empty() {
            return Err(ServiceError::inference_failed("input contains no samples"));
        }

        let stems = self.run(audio.samples)?;
        if stems.len() != self.spec.num_speakers {
            tracing::warn!(
                expected = self.spec.num_speakers,
                actual = stems.len(),
                "Model produced an unexpected number of stems"
            );
        }

        for (i, stem) in stems.iter().enumerate() {
            let path = out_dir.join(format!("index{}.wav", i + 1));
            write_wav_mono_f32(stem, &path, self.spec.sample_rate)?;
        }

        Ok(())
    }

    fn device_name(&self) -> &str {
        &self.device
    }
}

/// Splits a flat `[1, S, T]` or `[S, T]` tensor into `S` stems.
pub fn split_stems(shape: &[i64], data: &[f32]) -> Result<Vec<Vec<f32>>> {
    let dims: Vec<usize> = match shape {
        [1, s, t] | [s, t] if *s > 0 && *t >= 0 => vec![*s as usize, *t as usize],
        _ => {
            return Err(ServiceError::inference_failed(format!(
                "unexpected output shape {:?}, expected [1, S, T] or [S, T]",
                shape
            )))
        }
    };

    let view = ArrayView2::from_shape((dims[0], dims[1]), data).map_err(|e| {
        ServiceError::inference_failed(format!("output shape {:?} does not match data: {}", shape, e))
    })?;

    Ok(view.rows().into_iter().map(|row| row.to_vec()).collect())
}

/// Resolves `device` to a device name and execution provider list.
///
/// CPU is always the last provider so registration failures of an
/// accelerator fall back to it.
fn select_providers(device: Device) -> (String, Vec<ExecutionProviderDispatch>) {
    let cuda = CUDAExecutionProvider::default();
    let coreml = CoreMLExecutionProvider::default();

    let chosen = match device {
        Device::Cpu => Device::Cpu,
        Device::Cuda => Device::Cuda,
        Device::Metal => Device::Metal,
        Device::Auto => {
            if cuda.is_available().unwrap_or(false) {
                Device::Cuda
            } else if cfg!(target_os = "macos") && coreml.is_available().unwrap_or(false) {
                Device::Metal
            } else {
                Device::Cpu
            }
        }
    };

    let mut providers = Vec::new();
    match chosen {
        Device::Cuda => providers.push(cuda.build()),
        Device::Metal => providers.push(coreml.build()),
        Device::Cpu | Device::Auto => {}
    }
    providers.push(CPUExecutionProvider::default().build());

    (chosen.as_str().to_string(), providers)
}

/// Loads an [`OnnxSeparator`] for a registry entry, fetching the checkpoint
/// first if needed.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    /// Model to load.
    pub spec: ModelSpec,
    /// Where to find or download the checkpoint.
    pub source: CheckpointSource,
    /// Requested device.
    pub device: Device,
    /// Intra-op thread count.
    pub threads: Option<u32>,
}

impl OnnxLoader {
    /// Path the checkpoint is expected at.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.source.model_dir.join(self.spec.checkpoint_file)
    }
}

impl SeparatorLoader for OnnxLoader {
    fn load(&self) -> Result<Box<dyn Separator>> {
        let checkpoint = ensure_checkpoint(&self.spec, &self.source)?;
        let separator = OnnxSeparator::load(&checkpoint, self.spec, self.device, self.threads)?;
        Ok(Box::new(separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::models::registry::MODEL_SPECS;
    use tempfile::tempdir;

    #[test]
    fn split_batched_output() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let stems = split_stems(&[1, 2, 3], &data).unwrap();
        assert_eq!(stems, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn split_unbatched_output() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let stems = split_stems(&[3, 2], &data).unwrap();
        assert_eq!(stems.len(), 3);
        assert_eq!(stems[2], vec![5.0, 6.0]);
    }

    #[test]
    fn split_rejects_bad_shapes() {
        let data = vec![0.0; 6];
        assert!(split_stems(&[6], &data).is_err());
        assert!(split_stems(&[2, 1, 3], &data).is_err());
        assert!(split_stems(&[1, 0, 6], &data).is_err());
        let err = split_stems(&[1, 2, 4], &data).unwrap_err();
        assert_eq!(err.code, ErrorCode::InferenceFailed);
    }

    #[test]
    fn cpu_always_last_provider() {
        let (name, providers) = select_providers(Device::Cpu);
        assert_eq!(name, "cpu");
        assert_eq!(providers.len(), 1);

        let (name, providers) = select_providers(Device::Cuda);
        assert_eq!(name, "cuda");
        assert_eq!(providers.len(), 2);
    }

    #[test]
    fn loader_without_checkpoint_fails_to_initialize() {
        let dir = tempdir().unwrap();
        let loader = OnnxLoader {
            spec: MODEL_SPECS[0],
            source: CheckpointSource {
                model_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            device: Device::Cpu,
            threads: None,
        };
        assert_eq!(
            loader.checkpoint_path(),
            dir.path().join("mossformer2_librimix_2spk.onnx")
        );
        let err = loader.load().err().unwrap();
        assert_eq!(err.code, ErrorCode::InitializationFailed);
    }
}
