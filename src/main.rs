//! stemsep-daemon: HTTP speaker separation service.
//!
//! Reads configuration from the environment and command line, resolves the
//! model configuration, loads the model (unless lazy loading is enabled)
//! and serves `POST /separate` until interrupted.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stemsep_daemon::cli::Cli;
use stemsep_daemon::config::ServiceConfig;
use stemsep_daemon::gateway::ModelGateway;
use stemsep_daemon::http::{serve, AppState};
use stemsep_daemon::models::{CheckpointSource, ModelRegistry, OnnxLoader};
use stemsep_daemon::orchestrator::RequestOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stemsep_daemon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse_args();
    let mut config = ServiceConfig::from_env();
    cli.apply(&mut config);

    if let Some(problem) = config.validate() {
        bail!("Invalid configuration: {}", problem);
    }

    let spec = ModelRegistry::builtin()
        .resolve(&config.model_config)
        .context("Unknown model configuration")?;
    if spec.sample_rate != config.normalization.sample_rate {
        bail!(
            "{} expects {} Hz audio but normalization targets {} Hz",
            spec.name,
            spec.sample_rate,
            config.normalization.sample_rate
        );
    }

    let model_dir = config.effective_model_path();
    info!(
        model = spec.name,
        speakers = spec.num_speakers,
        model_dir = %model_dir.display(),
        device = %config.device,
        ffmpeg = %config.ffmpeg_path.display(),
        extensions = %config.audio_extensions.join(","),
        "Starting stemsep-daemon"
    );

    let loader = OnnxLoader {
        spec: *spec,
        source: CheckpointSource {
            model_dir,
            url: config.model_url.clone(),
            sha256: config.model_sha256.clone(),
        },
        device: config.device,
        threads: config.threads,
    };
    let gateway = Arc::new(ModelGateway::new(spec.name, Box::new(loader)));

    if config.lazy_load {
        info!("Model will be loaded on the first request");
    } else {
        gateway
            .ensure_loaded()
            .await
            .context("Failed to load separation model")?;
    }

    let state = AppState::new(RequestOrchestrator::new(&config, gateway));
    serve(&config.bind_addr(), state)
        .await
        .with_context(|| format!("Server on {} failed", config.bind_addr()))?;

    info!("Server stopped");
    Ok(())
}
