//! Error types shared across warden crates
//!
//! The variants follow the access-control failure taxonomy: a missing
//! subject or resource, an authorization denial, an upstream orchestration
//! failure, or a credential issuance failure. Each variant carries enough
//! context to be logged without being shown to end users.

use thiserror::Error;

/// Main error type for warden operations
#[derive(Debug, Error)]
pub enum Error {
    /// A subject or resource does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up (user, team, endpoint, ...)
        kind: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// An authorization check denied the operation
    #[error("forbidden: {message}")]
    Forbidden {
        /// Internal reason, never returned to callers verbatim
        message: String,
    },

    /// The platform security token is missing or invalid
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Description of what failed
        message: String,
    },

    /// The orchestration backend is unreachable or returned an error
    #[error("upstream error: {message}")]
    Upstream {
        /// Description of what failed
        message: String,
    },

    /// Token issuance or request signing failed
    #[error("credential error: {message}")]
    Credential {
        /// Description of what failed
        message: String,
    },

    /// The data store failed to read or write a record
    #[error("store error: {message}")]
    Store {
        /// Description of what failed
        message: String,
    },

    /// Malformed input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what is invalid
        message: String,
    },

    /// Startup or runtime configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a not-found error for a record kind and id
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden {
            message: msg.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: msg.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
        }
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential {
            message: msg.into(),
        }
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error means the looked-up record is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether this error is an authorization denial
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Forbidden { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation {
            message: e.to_string(),
        }
    }
}
