//! Error types for Bloodbridge
//!
//! ## Table of Contents
//! - **BridgeError**: Main error enum covering all failure modes
//! - **ErrorKind**: Coarse classification used by the request layer
//! - **Result**: Type alias for `Result<T, BridgeError>`

use thiserror::Error;

/// Result type alias for Bloodbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for Bloodbridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed input shape, with the offending field
    #[error("validation error on {field}: {message}")]
    Validation {
        /// Field path, e.g. `items[2].bloodType`
        field: String,
        /// Human readable reason
        message: String,
    },

    /// Referenced entity is absent
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity name (ledger, item, hospital, ...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// State-machine violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Proposal token unknown, already resolved, or past its expiry
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    /// Geocoder could not resolve a postal code
    #[error("invalid postal code: {0}")]
    InvalidPostalCode(String),

    /// External collaborator failure (geocoder transport, webhook)
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Record store failure
    #[error("storage error: {0}")]
    Store(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Metrics registration failure
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied bad input
    Validation,
    /// Referenced entity does not exist
    NotFound,
    /// Operation not allowed in the current state
    Conflict,
    /// External dependency failed
    Upstream,
    /// Everything else
    Internal,
}

impl BridgeError {
    /// Create a validation error for a field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a storage error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::InvalidPostalCode(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) | Self::InvalidOrExpiredToken => ErrorKind::Conflict,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Store(_)
            | Self::Config(_)
            | Self::Metrics(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code for the request layer
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Upstream => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<prometheus::Error> for BridgeError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
