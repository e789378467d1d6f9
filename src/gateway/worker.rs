//! Inference worker thread.
//!
//! A single background thread owns the loaded [`Separator`] and drains a
//! channel of separation jobs one at a time, in submission order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;

use crate::config::DEFAULT_AUDIO_EXTENSIONS;
use crate::error::{ErrorCode, Result, ServiceError};
use crate::models::{Separator, SeparatorLoader};
use crate::types::SeparationResult;

/// Reply channel for one separation job.
pub type JobReply = oneshot::Receiver<Result<SeparationResult>>;

/// One unit of work for the worker.
#[derive(Debug)]
pub struct SeparationJob {
    /// Normalized input file.
    pub mix: PathBuf,
    /// Directory stems are written to.
    pub out_dir: PathBuf,
    /// Request id for log correlation.
    pub request_id: String,
    reply: oneshot::Sender<Result<SeparationResult>>,
}

/// Message sent to the worker thread.
#[derive(Debug)]
pub enum WorkerMessage {
    /// A job to run.
    Separate(Box<SeparationJob>),
    /// Request to shut down the worker.
    Shutdown,
}

/// Owner of the inference thread.
///
/// Dropping the worker stops the thread after the job in progress (if any)
/// completes. Jobs still queued at that point are answered with an error.
pub struct InferenceWorker {
    /// Channel to send jobs to the worker.
    sender: Mutex<Sender<WorkerMessage>>,
    /// Handle to the worker thread.
    thread_handle: Option<JoinHandle<()>>,
    /// Jobs submitted but not yet answered.
    pending: Arc<AtomicUsize>,
    /// Device the model runs on.
    device: String,
}

impl std::fmt::Debug for InferenceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceWorker")
            .field("device", &self.device)
            .field("pending", &self.pending())
            .finish()
    }
}

impl InferenceWorker {
    /// Spawns the worker thread, loads the model on it and waits for the
    /// outcome.
    ///
    /// Loading errors and panics become initialization errors; the thread
    /// exits in that case.
    pub async fn start(loader: Box<dyn SeparatorLoader>) -> Result<Self> {
        let (job_sender, job_receiver) = mpsc::channel::<WorkerMessage>();
        let (ready_sender, ready_receiver) = oneshot::channel::<Result<String>>();
        let pending = Arc::new(AtomicUsize::new(0));
        let pending_clone = Arc::clone(&pending);

        let thread_handle = thread::Builder::new()
            .name("stemsep-inference".to_string())
            .spawn(move || {
                let loaded = panic::catch_unwind(AssertUnwindSafe(|| loader.load()))
                    .unwrap_or_else(|payload| {
                        Err(ServiceError::initialization_failed(format!(
                            "model loader panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });

                let separator = match loaded {
                    Ok(separator) => separator,
                    Err(e) => {
                        ready_sender.send(Err(e)).ok();
                        return;
                    }
                };

                if ready_sender
                    .send(Ok(separator.device_name().to_string()))
                    .is_err()
                {
                    return;
                }

                Self::worker_loop(job_receiver, separator, pending_clone);
            })
            .map_err(|e| {
                ServiceError::initialization_failed(format!(
                    "Failed to spawn inference thread: {}",
                    e
                ))
            })?;

        let device = match ready_receiver.await {
            Ok(Ok(device)) => device,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ServiceError::initialization_failed(
                    "inference thread exited during model load",
                ))
            }
        };

        Ok(Self {
            sender: Mutex::new(job_sender),
            thread_handle: Some(thread_handle),
            pending,
            device,
        })
    }

    /// Enqueues a job and returns the channel its result arrives on.
    ///
    /// Jobs are run in the order this method is called.
    pub fn submit(&self, mix: &Path, out_dir: &Path, request_id: &str) -> Result<JobReply> {
        let (reply, receiver) = oneshot::channel();
        let job = SeparationJob {
            mix: mix.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
            request_id: request_id.to_string(),
            reply,
        };

        let sender = self
            .sender
            .lock()
            .map_err(|_| ServiceError::inference_failed("inference queue lock poisoned"))?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(WorkerMessage::Separate(Box::new(job))).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ServiceError::inference_failed("inference worker is not running"));
        }

        Ok(receiver)
    }

    /// Number of jobs submitted but not yet answered.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Name of the device the model runs on.
    pub fn device_name(&self) -> &str {
        &self.device
    }

    /// Shuts down the worker.
    pub fn shutdown(&mut self) {
        if let Ok(sender) = self.sender.lock() {
            sender.send(WorkerMessage::Shutdown).ok();
        }
        if let Some(handle) = self.thread_handle.take() {
            handle.join().ok();
        }
    }

    /// The main processing loop running in the background thread.
    fn worker_loop(
        receiver: Receiver<WorkerMessage>,
        mut separator: Box<dyn Separator>,
        pending: Arc<AtomicUsize>,
    ) {
        loop {
            match receiver.recv() {
                Ok(WorkerMessage::Separate(job)) => {
                    let span = tracing::info_span!("inference", request_id = %job.request_id);
                    let _enter = span.enter();

                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_job(separator.as_mut(), &job.mix, &job.out_dir)
                    }))
                    .unwrap_or_else(|payload| {
                        Err(ServiceError::inference_failed(format!(
                            "inference panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });

                    pending.fetch_sub(1, Ordering::SeqCst);
                    if job.reply.send(result).is_err() {
                        tracing::debug!("Requester went away before inference finished");
                    }
                }
                Ok(WorkerMessage::Shutdown) => {
                    break;
                }
                Err(_) => {
                    // Channel closed, exit
                    break;
                }
            }
        }

        // Answer anything left behind the shutdown marker.
        while let Ok(message) = receiver.try_recv() {
            if let WorkerMessage::Separate(job) = message {
                pending.fetch_sub(1, Ordering::SeqCst);
                job.reply
                    .send(Err(ServiceError::inference_failed(
                        "inference worker shut down",
                    )))
                    .ok();
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs one separation and collects its stems.
fn run_job(separator: &mut dyn Separator, mix: &Path, out_dir: &Path) -> Result<SeparationResult> {
    std::fs::create_dir_all(out_dir).map_err(|e| {
        ServiceError::with_source(
            ErrorCode::InferenceFailed,
            format!("Failed to create output directory {}", out_dir.display()),
            e,
        )
    })?;
    clear_stale_stems(out_dir)?;

    let started = std::time::Instant::now();
    separator.separate(mix, out_dir).map_err(|e| {
        if e.code == ErrorCode::InferenceFailed {
            e
        } else {
            ServiceError::inference_failed(e.to_string())
        }
    })?;

    let stems = collect_stems(out_dir)?;
    tracing::info!(
        stems = stems.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        out_dir = %out_dir.display(),
        "Inference complete"
    );

    SeparationResult::from_stems(stems, out_dir)
}

/// Parses the numeric index of an `index<N>.<ext>` file name.
///
/// `<ext>` must be a single audio extension, so leftovers such as
/// `index1.wav.part` are not stems.
fn stem_index(file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix("index")?;
    let (digits, ext) = rest.split_once('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ext = format!(".{}", ext.to_ascii_lowercase());
    if !DEFAULT_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    digits.parse().ok()
}

/// Removes stem files left in `out_dir` by an earlier run.
fn clear_stale_stems(out_dir: &Path) -> Result<()> {
    let entries = std::fs::read_dir(out_dir).map_err(|e| {
        ServiceError::with_source(
            ErrorCode::InferenceFailed,
            format!("Failed to list {}", out_dir.display()),
            e,
        )
    })?;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if stem_index(&name).is_none() || !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale stem"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ServiceError::with_source(
                    ErrorCode::InferenceFailed,
                    format!("Failed to remove stale stem {}", path.display()),
                    e,
                ))
            }
        }
    }
    Ok(())
}

/// Lists `index<N>.<ext>` files in `out_dir`, ordered by ascending index
/// (ties by file name), as absolute canonical paths.
pub fn collect_stems(out_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(out_dir).map_err(|e| {
        ServiceError::with_source(
            ErrorCode::InferenceFailed,
            format!("Failed to list {}", out_dir.display()),
            e,
        )
    })?;

    let mut stems: Vec<(u64, String, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(index) = stem_index(&name) else {
            continue;
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        stems.push((index, name, path));
    }
    stems.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    stems
        .into_iter()
        .map(|(_, _, path)| {
            std::fs::canonicalize(&path).map_err(|e| {
                ServiceError::with_source(
                    ErrorCode::InferenceFailed,
                    format!("Failed to resolve {}", path.display()),
                    e,
                )
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
