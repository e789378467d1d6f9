//! Error types for the stemsep daemon.
//!
//! Every failure in the request path is one of a handful of error codes.
//! Components return [`ServiceError`] values; only the HTTP layer turns a
//! code into a status code.

use std::fmt;

/// Error codes carried by every [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed payload, missing field, nonexistent file or disallowed extension.
    /// Trigger: anything the caller can fix by changing the request.
    InvalidInput,

    /// The external conversion tool failed.
    /// Trigger: ffmpeg missing, non-zero exit, or no output file written.
    PreprocessingFailed,

    /// The separation model failed on a normalized input.
    /// Trigger: inference error or panic, or no stem files produced.
    InferenceFailed,

    /// The separation model could not be made ready.
    /// Trigger: unknown configuration name, missing checkpoint, load failure.
    InitializationFailed,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::PreprocessingFailed => "PREPROCESSING_FAILED",
            ErrorCode::InferenceFailed => "INFERENCE_FAILED",
            ErrorCode::InitializationFailed => "INITIALIZATION_FAILED",
        }
    }

    /// Generic message that is safe to hand to a client.
    ///
    /// `InvalidInput` has no generic message because its own message is
    /// already specific and safe.
    pub fn public_message(&self) -> Option<&'static str> {
        match self {
            ErrorCode::InvalidInput => None,
            ErrorCode::PreprocessingFailed => Some("Audio pre-processing failed (ffmpeg error)"),
            ErrorCode::InferenceFailed => Some("Model inference failed; see server logs"),
            ErrorCode::InitializationFailed => {
                Some("Separation model is unavailable; see server logs")
            }
        }
    }

    /// Returns true if the caller caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ErrorCode::InvalidInput)
    }

    /// Returns a recovery hint for operators reading the logs.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => {
                "Send a JSON body with a 'path' pointing at an existing audio file \
                 with an allowed extension"
            }
            ErrorCode::PreprocessingFailed => {
                "Check that ffmpeg is installed and on PATH (or set STEMSEP_FFMPEG), \
                 and that the source file is a decodable audio file"
            }
            ErrorCode::InferenceFailed => {
                "Check available memory and the model checkpoint; \
                 try STEMSEP_DEVICE=cpu if accelerator inference is failing"
            }
            ErrorCode::InitializationFailed => {
                "Check STEMSEP_MODEL_CONFIG against the known configurations and that the \
                 checkpoint exists in the model directory (or set STEMSEP_MODEL_URL)"
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for service operations.
#[derive(Debug)]
pub struct ServiceError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Detailed message. Only exposed to clients for `InvalidInput`.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ServiceError {
    /// Creates a new ServiceError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new ServiceError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an INVALID_INPUT error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Creates an INVALID_INPUT error for a request without a `path` field.
    pub fn missing_path() -> Self {
        Self::invalid_input("JSON payload must contain 'path'")
    }

    /// Creates an INVALID_INPUT error for a path that is not an existing file.
    pub fn file_not_found(path: &std::path::Path) -> Self {
        Self::invalid_input(format!("File not found: {}", path.display()))
    }

    /// Creates an INVALID_INPUT error for a disallowed extension.
    pub fn unsupported_extension(extension: &str, allowed: &[String]) -> Self {
        Self::invalid_input(format!(
            "Unsupported extension '{}' (allowed: {})",
            extension,
            allowed.join(", ")
        ))
    }

    /// Creates a PREPROCESSING_FAILED error.
    pub fn preprocessing_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PreprocessingFailed,
            format!("Pre-processing failed: {}", reason.into()),
        )
    }

    /// Creates an INFERENCE_FAILED error.
    pub fn inference_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InferenceFailed,
            format!("Inference failed: {}", reason.into()),
        )
    }

    /// Creates an INFERENCE_FAILED error for an inference call that wrote no stems.
    pub fn no_output_produced(out_dir: &std::path::Path) -> Self {
        Self::inference_failed(format!("no output produced in {}", out_dir.display()))
    }

    /// Creates an INITIALIZATION_FAILED error.
    pub fn initialization_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InitializationFailed,
            format!("Initialization failed: {}", reason.into()),
        )
    }

    /// Creates an INITIALIZATION_FAILED error for a missing checkpoint.
    pub fn checkpoint_not_found(path: &std::path::Path) -> Self {
        Self::initialization_failed(format!("checkpoint not found at {}", path.display()))
    }

    /// Returns an owned copy with the source folded into the message.
    ///
    /// Used where one stored error is reported to many callers.
    pub fn detached(&self) -> Self {
        let message = match &self.source {
            Some(source) => format!("{}: {}", self.message, source),
            None => self.message.clone(),
        };
        Self::new(self.code, message)
    }

    /// Message that may be returned to a client.
    ///
    /// Internal detail never leaves the process: for everything except
    /// `InvalidInput` this is the code's generic message.
    pub fn public_message(&self) -> &str {
        self.code.public_message().unwrap_or(&self.message)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using ServiceError.
pub type Result<T> = std::result::Result<T, ServiceError>;
