//! HTTP server: router construction and graceful shutdown.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::orchestrator::RequestOrchestrator;

use super::handlers;

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Request pipeline, shared by every handler.
    pub orchestrator: Arc<RequestOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: RequestOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/separate", post(handlers::separate))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves `state` until Ctrl-C or SIGTERM.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Resolves when the process is asked to stop.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}
