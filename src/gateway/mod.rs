//! Model gateway.
//!
//! Owns the process-wide separation model. The model is initialized at most
//! once, on first use or eagerly at startup, and all inference goes through
//! a single [`InferenceWorker`] so calls never overlap.

pub mod worker;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{Result, ServiceError};
use crate::models::SeparatorLoader;
use crate::types::SeparationResult;

pub use worker::{collect_stems, InferenceWorker, JobReply};

/// Handle to the loaded model.
///
/// Cheap to clone; every clone feeds the same worker queue.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    worker: Arc<InferenceWorker>,
}

impl ModelHandle {
    /// Enqueues a separation and returns its reply channel.
    pub fn submit(&self, mix: &Path, out_dir: &Path, request_id: &str) -> Result<JobReply> {
        self.worker.submit(mix, out_dir, request_id)
    }

    /// Separates `mix` into `out_dir` and waits for the result.
    pub async fn separate(
        &self,
        mix: &Path,
        out_dir: &Path,
        request_id: &str,
    ) -> Result<SeparationResult> {
        let reply = self.submit(mix, out_dir, request_id)?;
        reply
            .await
            .map_err(|_| ServiceError::inference_failed("inference worker dropped the job"))?
    }

    /// Name of the device the model runs on.
    pub fn device_name(&self) -> &str {
        self.worker.device_name()
    }

    /// Number of separations waiting or running.
    pub fn queued(&self) -> usize {
        self.worker.pending()
    }
}

/// Snapshot of the gateway for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    /// Configuration name.
    pub config: String,
    /// True once the model is loaded.
    pub loaded: bool,
    /// True if initialization was attempted and failed.
    pub failed: bool,
    /// Device the model runs on, once loaded.
    pub device: Option<String>,
    /// Separations waiting or running.
    pub queued: usize,
}

/// Lazily initialized, process-wide access to the separation model.
pub struct ModelGateway {
    config_name: String,
    loader: Mutex<Option<Box<dyn SeparatorLoader>>>,
    model: OnceCell<Result<ModelHandle>>,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("config", &self.config_name)
            .field("status", &self.status())
            .finish()
    }
}

impl ModelGateway {
    /// Creates a gateway that will load its model with `loader`.
    ///
    /// Nothing is loaded until [`ensure_loaded`](Self::ensure_loaded) is
    /// first called.
    pub fn new(config_name: impl Into<String>, loader: Box<dyn SeparatorLoader>) -> Self {
        Self {
            config_name: config_name.into(),
            loader: Mutex::new(Some(loader)),
            model: OnceCell::new(),
        }
    }

    /// Returns the loaded model, loading it if this is the first call.
    ///
    /// Concurrent first callers share one initialization attempt. A failed
    /// initialization is remembered and returned on every later call.
    pub async fn ensure_loaded(&self) -> Result<ModelHandle> {
        let outcome = self
            .model
            .get_or_init(|| async {
                let loader = self.loader.lock().ok().and_then(|mut slot| slot.take());
                let Some(loader) = loader else {
                    return Err(ServiceError::initialization_failed(
                        "model loader is no longer available",
                    ));
                };

                tracing::info!(model = %self.config_name, "Initializing separation model");
                let started = Instant::now();

                match InferenceWorker::start(loader).await {
                    Ok(worker) => {
                        tracing::info!(
                            model = %self.config_name,
                            device = worker.device_name(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Separation model ready"
                        );
                        Ok(ModelHandle {
                            worker: Arc::new(worker),
                        })
                    }
                    Err(e) => {
                        tracing::error!(
                            model = %self.config_name,
                            error = %e,
                            hint = e.code.recovery_hint(),
                            "Separation model failed to initialize"
                        );
                        Err(e)
                    }
                }
            })
            .await;

        match outcome {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => Err(e.detached()),
        }
    }

    /// Ensures the model is loaded, then separates `mix` into `out_dir`.
    pub async fn separate(
        &self,
        mix: &Path,
        out_dir: &Path,
        request_id: &str,
    ) -> Result<SeparationResult> {
        let handle = self.ensure_loaded().await?;
        handle.separate(mix, out_dir, request_id).await
    }

    /// Returns true once the model is loaded.
    pub fn is_loaded(&self) -> bool {
        matches!(self.model.get(), Some(Ok(_)))
    }

    /// Returns the current status.
    pub fn status(&self) -> GatewayStatus {
        let (loaded, failed, device, queued) = match self.model.get() {
            Some(Ok(handle)) => (true, false, Some(handle.device_name().to_string()), handle.queued()),
            Some(Err(_)) => (false, true, None, 0),
            None => (false, false, None, 0),
        };
        GatewayStatus {
            config: self.config_name.clone(),
            loaded,
            failed,
            device,
            queued,
        }
    }
}
