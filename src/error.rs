#[cfg(feature = "web")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// One failed attempt to bring up a compute backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendAttempt {
    /// Name of the backend that was tried.
    pub backend: String,
    /// Why it could not be initialized.
    pub error: String,
}

impl fmt::Display for BackendAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

fn join_attempts(attempts: &[BackendAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No usable numeric runtime in this process
    #[error("Environment unsupported: {0}")]
    EnvironmentUnsupported(String),

    /// Every candidate compute backend failed to initialize
    #[error("No compute backend available ({})", join_attempts(.attempts))]
    BackendUnavailable {
        /// Each backend that was tried, in preference order.
        attempts: Vec<BackendAttempt>,
    },

    /// The embedding model could not be fetched or parsed
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// The image source could not be read or decoded
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Inference failed on a decoded image
    #[error("Feature extraction error: {0}")]
    FeatureExtraction(String),

    /// Two embeddings of different (or zero) length were compared
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// Length of the left-hand vector.
        left: usize,
        /// Length of the right-hand vector.
        right: usize,
    },

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The remote search service failed or reported an error
    #[error("Search service error: {0}")]
    Service(String),

    /// Upload errors
    #[error("Upload error: {0}")]
    UploadError(String),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Standard error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code (HTTP status code)
    pub code: u16,
    /// Error message
    pub message: String,
    /// Optional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    #[cfg(feature = "web")]
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::UploadError(_) | Self::ImageDecode(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::FeatureExtraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EnvironmentUnsupported(_)
            | Self::BackendUnavailable { .. }
            | Self::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Service(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a later call may succeed where this one failed.
    ///
    /// Backend and environment failures are terminal for the process; a
    /// failed model load leaves the cache empty so the next call retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelLoad(_) | Self::Service(_) | Self::Io(_))
    }

    /// Convert the error to a JSON response
    pub fn to_json(&self) -> ErrorResponse {
        #[cfg(feature = "web")]
        let code = self.status_code().as_u16();
        #[cfg(not(feature = "web"))]
        let code = 500u16;

        let details = match self {
            Self::BackendUnavailable { attempts } => Some(join_attempts(attempts)),
            _ => None,
        };

        ErrorResponse {
            code,
            message: self.to_string(),
            details,
        }
    }
}

#[cfg(feature = "web")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = self.to_json();

        (status, Json(response)).into_response()
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::ImageDecode(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Task join error: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(feature = "web")]
impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::UploadError(err.to_string())
    }
}

#[cfg(feature = "torch")]
impl From<tch::TchError> for AppError {
    fn from(err: tch::TchError) -> Self {
        AppError::ModelLoad(format!("PyTorch error: {}", err))
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;
