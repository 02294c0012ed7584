//! Error types for the gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message returned for every denied operation
pub const PERMISSION_DENIED: &str = "permission denied";

/// Error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication failed (invalid or missing platform token)
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Authorization failed
    #[error("authorization failed: {0}")]
    Forbidden(String),

    /// Environment or record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Failed to reach the environment
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Proxy(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to the caller
    ///
    /// Denials never say which policy produced them, and internal failures
    /// are only described in the log.
    fn public_message(&self) -> String {
        match self {
            Error::Forbidden(_) => PERMISSION_DENIED.to_string(),
            Error::Proxy(_) => "failed to reach environment".to_string(),
            Error::Config(_) | Error::Internal(_) => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Error::Forbidden(_) => warn!(error = %self, "Request denied"),
            Error::Proxy(_) | Error::Config(_) | Error::Internal(_) => {
                error!(error = %self, "Request failed")
            }
            _ => {}
        }

        // Return K8s-style Status response
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.public_message(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<warden_common::Error> for Error {
    fn from(e: warden_common::Error) -> Self {
        use warden_common::Error as Common;
        match e {
            Common::NotFound { .. } => Error::NotFound(e.to_string()),
            Common::Forbidden { message } => Error::Forbidden(message),
            Common::Unauthorized { message } => Error::Unauthorized(message),
            Common::Upstream { message } => Error::Proxy(message),
            Common::Validation { message } => Error::BadRequest(message),
            Common::Config { message } => Error::Config(message),
            Common::Credential { .. } | Common::Store { .. } => Error::Internal(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Proxy(e.to_string())
    }
}
