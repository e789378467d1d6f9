//! Mapping of service errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ServiceError;

use super::types::ErrorResponse;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Client errors keep their specific message; everything else is a 500
/// with the code's generic message.
impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        if err.code.is_client_error() {
            ApiError::bad_request(err.public_message())
        } else {
            ApiError::internal(err.public_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn invalid_input_is_400_with_message() {
        let api: ApiError = ServiceError::file_not_found(Path::new("/x.wav")).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.message, "File not found: /x.wav");
    }

    #[test]
    fn server_errors_are_500_and_generic() {
        let cases = [
            (
                ServiceError::preprocessing_failed("exit status 1"),
                "Audio pre-processing failed (ffmpeg error)",
            ),
            (
                ServiceError::inference_failed("tensor shape mismatch"),
                "Model inference failed; see server logs",
            ),
            (
                ServiceError::initialization_failed("checkpoint missing"),
                "Separation model is unavailable; see server logs",
            ),
        ];
        for (err, expected) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(api.message, expected);
        }
    }
}
