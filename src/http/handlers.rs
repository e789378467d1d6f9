//! Route handlers.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};

use crate::error::ServiceError;

use super::error::ApiError;
use super::server::AppState;
use super::types::{HealthResponse, SeparateResponse};

/// `POST /separate`
///
/// The body is read as raw bytes so any content type is accepted. The
/// request runs in its own task; a client disconnect does not abort it.
pub async fn separate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SeparateResponse>, ApiError> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let task = tokio::spawn(async move { orchestrator.handle(&body).await });

    let result = task.await.map_err(|e| {
        tracing::error!(error = %e, "Separation task did not complete");
        ApiError::from(ServiceError::inference_failed(e.to_string()))
    })??;

    Ok(Json(SeparateResponse::from(result)))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.orchestrator.gateway().status(),
    })
}
