//! Separation model components.
//!
//! - [`registry`]: known pretrained configurations
//! - [`backend`]: the [`Separator`] / [`SeparatorLoader`] seam used by the inference worker
//! - [`downloader`]: checkpoint download and digest verification
//! - [`onnx`]: ONNX Runtime implementation

pub mod backend;
pub mod downloader;
pub mod onnx;
pub mod registry;

// Re-export commonly used types
pub use backend::{Separator, SeparatorLoader};
pub use downloader::{ensure_checkpoint, verify_sha256, CheckpointSource};
pub use onnx::{OnnxLoader, OnnxSeparator};
pub use registry::{ModelRegistry, ModelSpec, MODEL_SPECS};
