//! Error types for concord.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for concord operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for concord.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Not enough models: {required} required, {available} available")]
    InsufficientModels { required: usize, available: usize },

    #[error("Unknown model '{key}'")]
    UnknownModel { key: String },

    #[error("Quorum not met: {received} of {required} required responses succeeded")]
    QuorumNotMet {
        required: usize,
        received: usize,
        /// One `model: cause` line per failed participant.
        failures: Vec<String>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::InsufficientModels { .. } => "insufficient_models",
            Error::UnknownModel { .. } => "unknown_model",
            Error::QuorumNotMet { .. } => "quorum_not_met",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InsufficientModels { .. } => StatusCode::BAD_REQUEST,
            Error::UnknownModel { .. } => StatusCode::BAD_REQUEST,
            Error::QuorumNotMet { .. } => StatusCode::BAD_GATEWAY,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let mut error = serde_json::json!({
            "message": self.to_string(),
            "type": "concord_error",
            "kind": self.kind(),
            "code": status.as_u16()
        });
        if let Error::QuorumNotMet { failures, .. } = &self {
            error["failures"] = serde_json::json!(failures);
        }

        (status, axum::Json(serde_json::json!({ "error": error }))).into_response()
    }
}
