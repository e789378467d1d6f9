//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::gateway::GatewayStatus;
use crate::types::SeparationResult;

/// Body of a successful `POST /separate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparateResponse {
    /// Absolute stem paths in index order.
    pub separated_paths: Vec<String>,
}

impl From<SeparationResult> for SeparateResponse {
    fn from(result: SeparationResult) -> Self {
        Self {
            separated_paths: result.to_strings(),
        }
    }
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: GatewayStatus,
}
