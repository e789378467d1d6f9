//! stemsep-daemon: speaker separation service backed by ONNX Runtime.
//!
//! Accepts a path to an audio file over HTTP, normalizes it with ffmpeg,
//! runs a pretrained separation model and returns the paths of the
//! per-speaker stem files it wrote next to the source.
//!
//! # Modules
//!
//! - [`types`]: Request, result and per-request stage types
//! - [`config`]: Runtime configuration (ServiceConfig, Device)
//! - [`error`]: Error types and codes (ServiceError, ErrorCode)
//! - [`audio`]: Path validation, ffmpeg normalization, WAV I/O
//! - [`models`]: Model registry, checkpoint provisioning, ONNX separator
//! - [`gateway`]: Lazily loaded model behind a single inference worker
//! - [`orchestrator`]: The per-request pipeline
//! - [`http`]: axum router and server
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stemsep_daemon::{
//!     config::ServiceConfig,
//!     gateway::ModelGateway,
//!     models::{CheckpointSource, ModelRegistry, OnnxLoader},
//!     orchestrator::RequestOrchestrator,
//! };
//!
//! let config = ServiceConfig::from_env();
//! let spec = ModelRegistry::builtin().resolve(&config.model_config)?;
//! let loader = OnnxLoader {
//!     spec: *spec,
//!     source: CheckpointSource {
//!         model_dir: config.effective_model_path(),
//!         ..Default::default()
//!     },
//!     device: config.device,
//!     threads: config.threads,
//! };
//! let gateway = Arc::new(ModelGateway::new(spec.name, Box::new(loader)));
//! let orchestrator = RequestOrchestrator::new(&config, gateway);
//!
//! let result = orchestrator.handle(br#"{"path": "/data/meeting.wav"}"#).await?;
//! for stem in result.stems() {
//!     println!("{}", stem.display());
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use config::{Device, ServiceConfig};
pub use error::{ErrorCode, Result, ServiceError};
pub use gateway::{ModelGateway, ModelHandle};
pub use orchestrator::RequestOrchestrator;
pub use types::{AudioRequest, RequestStage, SeparationResult};
