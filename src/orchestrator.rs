//! Per-request pipeline.
//!
//! Parses the request, validates the source path, normalizes the audio,
//! runs separation and always removes the normalized temp file before
//! returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::Instrument;

use crate::audio::{AudioNormalizer, NormalizedAudio, Validator};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::gateway::ModelGateway;
use crate::types::{AudioRequest, RequestStage, SeparationResult};

/// In-flight locks keyed by canonical source path.
///
/// The normalized file and output directory are named after the source, so
/// requests for the same source must not overlap.
#[derive(Debug, Default)]
struct SourceLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl SourceLocks {
    /// Waits until no other request holds `source`.
    async fn acquire(&self, source: &Path) -> SourceLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(source.to_path_buf()).or_default())
        };

        let guard = lock.lock_owned().await;
        SourceLease {
            locks: self,
            source: source.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Drops the entry for `source` once nobody holds or waits on it.
    fn prune(&self, source: &Path) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(source)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(source);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

/// Exclusive use of one source path; released on drop.
struct SourceLease<'a> {
    locks: &'a SourceLocks,
    source: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SourceLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune(&self.source);
    }
}

/// Runs separation requests end to end.
#[derive(Debug)]
pub struct RequestOrchestrator {
    validator: Validator,
    normalizer: AudioNormalizer,
    gateway: Arc<ModelGateway>,
    separated_subdir: String,
    in_flight: SourceLocks,
}

impl RequestOrchestrator {
    /// Builds an orchestrator from the service configuration.
    pub fn new(config: &ServiceConfig, gateway: Arc<ModelGateway>) -> Self {
        Self {
            validator: Validator::new(config.audio_extensions.as_slice()),
            normalizer: AudioNormalizer::new(&config.ffmpeg_path, config.normalization.clone()),
            gateway,
            separated_subdir: config.separated_subdir.clone(),
            in_flight: SourceLocks::default(),
        }
    }

    /// The model gateway requests are sent to.
    pub fn gateway(&self) -> &Arc<ModelGateway> {
        &self.gateway
    }

    /// Directory stems for `source` are written to:
    /// `<source-dir>/<separated-subdir>/<normalized-stem>`.
    pub fn output_dir_for(&self, source: &Path, normalized: &NormalizedAudio) -> PathBuf {
        source
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .join(&self.separated_subdir)
            .join(normalized.file_stem())
    }

    /// Handles one request body.
    ///
    /// The body must be JSON with a `path` field; the content type is not
    /// checked.
    pub async fn handle(&self, raw: &[u8]) -> Result<SeparationResult> {
        let span = tracing::info_span!("separate", request_id = tracing::field::Empty);
        self.handle_in_span(raw).instrument(span).await
    }

    async fn handle_in_span(&self, raw: &[u8]) -> Result<SeparationResult> {
        let mut stage = RequestStage::default();
        let outcome = self.run_stages(raw, &mut stage).await;

        match &outcome {
            Ok(result) => {
                stage.advance(RequestStage::Responded);
                tracing::info!(stems = result.len(), "Separation complete");
            }
            Err(e) if e.code.is_client_error() => {
                tracing::warn!(stage = %stage, error = %e, "Rejected request");
                stage.advance(RequestStage::Failed(e.code));
            }
            Err(e) => {
                tracing::error!(
                    stage = %stage,
                    error = %e,
                    hint = e.code.recovery_hint(),
                    "Separation failed"
                );
                stage.advance(RequestStage::Failed(e.code));
            }
        }

        outcome
    }

    async fn run_stages(&self, raw: &[u8], stage: &mut RequestStage) -> Result<SeparationResult> {
        let request = AudioRequest::from_json(raw)?.canonicalize();
        tracing::Span::current().record("request_id", request.request_id.as_str());
        tracing::info!(path = %request.source_path().display(), "Separation requested");

        self.validator.validate(request.source_path())?;
        stage.advance(RequestStage::Validated);

        // Held until the normalized file is gone.
        let lease = self.in_flight.acquire(request.source_path()).await;

        let normalized = self.normalizer.normalize(request.source_path()).await?;
        stage.advance(RequestStage::Normalized);

        let out_dir = self.output_dir_for(request.source_path(), &normalized);
        let separated = self
            .gateway
            .separate(normalized.path(), &out_dir, &request.request_id)
            .await;
        normalized.release();
        drop(lease);

        let result = separated?;
        stage.advance(RequestStage::Inferred);
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_support::{fake_ffmpeg, partial_then_fail_ffmpeg, FakeBehavior, FakeSeparator};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn orchestrator(fake: &FakeSeparator) -> RequestOrchestrator {
        orchestrator_with_ffmpeg(fake, fake_ffmpeg())
    }

    fn orchestrator_with_ffmpeg(fake: &FakeSeparator, ffmpeg: PathBuf) -> RequestOrchestrator {
        let config = ServiceConfig {
            ffmpeg_path: ffmpeg,
            ..ServiceConfig::default()
        };
        let gateway = Arc::new(ModelGateway::new("test", fake.loader()));
        RequestOrchestrator::new(&config, gateway)
    }

    fn body(path: &Path) -> Vec<u8> {
        serde_json::json!({ "path": path }).to_string().into_bytes()
    }

    /// Canonical temp dir so paths compare equal to canonicalized results.
    fn scratch() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    fn source(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        crate::test_support::write_tone(&path, 8000, 1, 5.0);
        path
    }

    #[tokio::test]
    async fn valid_request_returns_ordered_stems() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let fake = FakeSeparator::writing(2);

        let result = orchestrator(&fake).handle(&body(&src)).await.unwrap();

        let out_dir = root.join("separated").join("a.mono8k");
        assert_eq!(
            result.stems(),
            &[out_dir.join("index1.wav"), out_dir.join("index2.wav")]
        );
        assert!(!root.join("a.mono8k.wav").exists());
        assert!(src.exists());
        assert_eq!(fake.seen(), vec![root.join("a.mono8k.wav")]);
    }

    #[tokio::test]
    async fn missing_path_field_is_rejected() {
        let fake = FakeSeparator::writing(2);
        let err = orchestrator(&fake).handle(b"{}").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.public_message().contains("'path'"));
        assert_eq!(fake.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_file_is_rejected() {
        let (_dir, root) = scratch();
        let fake = FakeSeparator::writing(2);
        let err = orchestrator(&fake)
            .handle(&body(&root.join("missing.wav")))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.public_message().contains("not found"));
        assert!(fake.seen().is_empty());
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let (_dir, root) = scratch();
        let note = root.join("note.txt");
        std::fs::write(&note, b"hello").unwrap();
        let fake = FakeSeparator::writing(2);

        let err = orchestrator(&fake).handle(&body(&note)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err
            .public_message()
            .to_lowercase()
            .contains("unsupported extension"));
        assert!(!root.join("note.mono8k.wav").exists());
        assert!(!root.join("separated").exists());
    }

    #[tokio::test]
    async fn inference_failure_is_generic_and_cleans_up() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let fake = FakeSeparator::behaving(FakeBehavior::Fail);

        let err = orchestrator(&fake).handle(&body(&src)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InferenceFailed);
        assert!(err.public_message().contains("inference failed"));
        assert!(!err.public_message().contains("exploded"));
        assert!(!root.join("a.mono8k.wav").exists());
    }

    #[tokio::test]
    async fn inference_panic_cleans_up() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let fake = FakeSeparator::behaving(FakeBehavior::Panic);

        let err = orchestrator(&fake).handle(&body(&src)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InferenceFailed);
        assert!(!root.join("a.mono8k.wav").exists());
    }

    #[tokio::test]
    async fn empty_output_is_inference_error() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let fake = FakeSeparator::behaving(FakeBehavior::WriteNothing);

        let err = orchestrator(&fake).handle(&body(&src)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InferenceFailed);
        assert!(err.message.contains("no output produced"));
        assert!(!root.join("a.mono8k.wav").exists());
    }

    #[tokio::test]
    async fn initialization_failure_cleans_up() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let mut fake = FakeSeparator::writing(2);
        fake.load_fails = true;

        let orchestrator = orchestrator(&fake);
        for _ in 0..2 {
            let err = orchestrator.handle(&body(&src)).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::InitializationFailed);
            assert!(!root.join("a.mono8k.wav").exists());
        }
        assert_eq!(fake.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preprocessing_failure_skips_inference() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let fake = FakeSeparator::writing(2);

        let err = orchestrator_with_ffmpeg(&fake, partial_then_fail_ffmpeg())
            .handle(&body(&src))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PreprocessingFailed);
        assert_eq!(
            err.public_message(),
            "Audio pre-processing failed (ffmpeg error)"
        );
        assert!(fake.seen().is_empty());
        assert!(!root.join("a.mono8k.wav").exists());
    }

    #[tokio::test]
    async fn uppercase_extension_accepted() {
        let (_dir, root) = scratch();
        let src = source(&root, "LOUD.WAV");
        let fake = FakeSeparator::writing(2);

        let result = orchestrator(&fake).handle(&body(&src)).await.unwrap();
        assert!(result.stems()[0].starts_with(root.join("separated").join("LOUD.mono8k")));
    }

    #[tokio::test]
    async fn relative_segments_are_resolved() {
        let (_dir, root) = scratch();
        std::fs::create_dir(root.join("sub")).unwrap();
        source(&root, "a.wav");
        let fake = FakeSeparator::writing(1);

        let indirect = root.join("sub").join("..").join("a.wav");
        let result = orchestrator(&fake).handle(&body(&indirect)).await.unwrap();
        assert_eq!(
            result.stems(),
            &[root.join("separated").join("a.mono8k").join("index1.wav")]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_source_requests_do_not_share_the_normalized_file() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let mut fake = FakeSeparator::writing(2);
        fake.require_mix = true;
        fake.delay = Duration::from_millis(50);
        let orchestrator = Arc::new(orchestrator(&fake));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                let src = src.clone();
                tokio::spawn(async move { orchestrator.handle(&body(&src)).await })
            })
            .collect();

        let out_dir = root.join("separated").join("a.mono8k");
        for task in tasks {
            let result = task.await.unwrap().unwrap();
            assert_eq!(
                result.stems(),
                &[out_dir.join("index1.wav"), out_dir.join("index2.wav")]
            );
        }

        assert_eq!(fake.seen().len(), 3);
        assert!(!root.join("a.mono8k.wav").exists());
        assert_eq!(orchestrator.in_flight.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_get_their_own_stems() {
        let (_dir, root) = scratch();
        let mut fake = FakeSeparator::writing(2);
        fake.delay = Duration::from_millis(20);
        fake.load_delay = Duration::from_millis(50);
        let orchestrator = Arc::new(orchestrator(&fake));

        let tasks: Vec<_> = ["a.wav", "b.wav", "c.wav"]
            .iter()
            .map(|name| {
                let src = source(&root, name);
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.handle(&body(&src)).await })
            })
            .collect();

        for (task, stem) in tasks.into_iter().zip(["a", "b", "c"]) {
            let result = task.await.unwrap().unwrap();
            let expected = root.join("separated").join(format!("{}.mono8k", stem));
            assert_eq!(result.len(), 2);
            assert!(result.stems().iter().all(|p| p.starts_with(&expected)));
            assert!(!root.join(format!("{}.mono8k.wav", stem)).exists());
        }

        assert_eq!(fake.loads.load(Ordering::SeqCst), 1);
        assert_eq!(fake.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.in_flight.len(), 0);
    }

    #[tokio::test]
    async fn source_lock_released_after_failure() {
        let (_dir, root) = scratch();
        let src = source(&root, "a.wav");
        let fake = FakeSeparator::behaving(FakeBehavior::Fail);
        let orchestrator = orchestrator(&fake);

        for _ in 0..2 {
            let err = orchestrator.handle(&body(&src)).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::InferenceFailed);
        }
        assert_eq!(orchestrator.in_flight.len(), 0);
    }
}
