//! Registry of pretrained separation configurations.
//!
//! Maps a configuration name to the checkpoint it loads and the shape of
//! audio it expects and produces.

use serde::Serialize;

use crate::error::{Result, ServiceError};

/// Description of one pretrained separation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// Configuration name, e.g. `mossformer2_librimix_2spk`.
    pub name: &'static str,
    /// Checkpoint file name inside the model directory.
    pub checkpoint_file: &'static str,
    /// Number of stems the model produces.
    pub num_speakers: usize,
    /// Native sample rate of input and output in Hz.
    pub sample_rate: u32,
    /// Human readable summary.
    pub description: &'static str,
}

/// Built-in configurations.
pub const MODEL_SPECS: &[ModelSpec] = &[
    ModelSpec {
        name: "mossformer2_librimix_2spk",
        checkpoint_file: "mossformer2_librimix_2spk.onnx",
        num_speakers: 2,
        sample_rate: 8000,
        description: "MossFormer2 trained on Libri2Mix, two speakers",
    },
    ModelSpec {
        name: "mossformer2_wsj0mix_2spk",
        checkpoint_file: "mossformer2_wsj0mix_2spk.onnx",
        num_speakers: 2,
        sample_rate: 8000,
        description: "MossFormer2 trained on WSJ0-2mix, two speakers",
    },
    ModelSpec {
        name: "mossformer2_wsj0mix_3spk",
        checkpoint_file: "mossformer2_wsj0mix_3spk.onnx",
        num_speakers: 3,
        sample_rate: 8000,
        description: "MossFormer2 trained on WSJ0-3mix, three speakers",
    },
    ModelSpec {
        name: "mossformer2_whamr_2spk",
        checkpoint_file: "mossformer2_whamr_2spk.onnx",
        num_speakers: 2,
        sample_rate: 8000,
        description: "MossFormer2 trained on WHAMR!, two speakers in noise and reverb",
    },
];

/// Lookup over a set of model specs.
#[derive(Debug, Clone, Copy)]
pub struct ModelRegistry {
    specs: &'static [ModelSpec],
}

impl ModelRegistry {
    /// Registry of the built-in configurations.
    pub fn builtin() -> Self {
        Self { specs: MODEL_SPECS }
    }

    /// Returns all known specs.
    pub fn specs(&self) -> &'static [ModelSpec] {
        self.specs
    }

    /// Returns the known configuration names.
    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    /// Resolves a configuration name.
    pub fn resolve(&self, name: &str) -> Result<&'static ModelSpec> {
        self.specs.iter().find(|s| s.name == name).ok_or_else(|| {
            ServiceError::initialization_failed(format!(
                "unknown model configuration '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }
}
