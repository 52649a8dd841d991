//! # Error Handling
//!
//! Centralized error types for Junction core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Handlers and middleware return [`Result<()>`]; any failure that reaches the
//! dispatcher is reported to the client through [`Error::status`].

use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for Junction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Junction runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Invalid route pattern provided at registration
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A failure that carries its own HTTP status
    ///
    /// Returned by handlers that want a specific client-facing status
    /// instead of the generic 500.
    #[error("{message}")]
    Http {
        /// HTTP status to report
        status: u16,
        /// Human-readable message sent to the client
        message: String,
    },

    /// A handler panicked and was recovered
    #[error("Handler panicked: {0}")]
    Panic(String),

    /// Configuration value could not be parsed
    #[error("Invalid configuration for {key}: {reason}")]
    Config {
        /// Environment key or config field
        key: String,
        /// Reason for rejection
        reason: String,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received at least {actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Declared body size, or the first size read past the limit
        actual: usize,
    },

    /// Any other application failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build a failure with an explicit HTTP status
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(400, message)
    }

    /// 401 Unauthorized
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::http(401, message)
    }

    /// 403 Forbidden
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::http(403, message)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::http(404, message)
    }

    /// 422 Unprocessable Entity
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::http(422, message)
    }

    /// Wrap an arbitrary message as a generic failure
    pub fn other(message: impl std::fmt::Display) -> Self {
        Self::Other(anyhow::anyhow!("{message}"))
    }

    /// Status the dispatcher reports for this failure
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the message is safe to show a client outside debug mode
    #[must_use]
    pub const fn is_client_facing(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::PayloadTooLarge { .. })
    }
}
