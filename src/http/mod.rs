//! HTTP front end.
//!
//! Exposes:
//! - `POST /separate` with body `{"path": "<file>"}`
//! - `GET /health`
//!
//! Status codes are assigned here and nowhere else.

pub mod error;
pub mod handlers;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use server::{create_router, serve, AppState};
pub use types::{ErrorResponse, HealthResponse, SeparateResponse};
