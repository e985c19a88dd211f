//! Generation error types.

use thiserror::Error;

/// Why a generation call produced no reply.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The service could not be reached or the connection broke.
    #[error("generation service unreachable: {0}")]
    Connection(String),

    /// The call did not finish within the configured budget.
    #[error("generation call timed out after {0}ms")]
    Timeout(u64),

    /// The service answered with something other than HTTP 200, or the
    /// concurrency gate was full (`status` is `None`).
    #[error("generation service error (status {status:?}): {message}")]
    Service {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// Response body or a description of the refusal.
        message: String,
    },

    /// The body was not JSON, matched neither envelope, or held no usable text.
    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    /// The configured endpoint cannot be used.
    #[error("invalid generation endpoint: {0}")]
    InvalidEndpoint(String),
}

impl GenerationError {
    /// Short class name for logs and metrics.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Service { .. } => "service",
            Self::MalformedResponse(_) => "malformed",
            Self::InvalidEndpoint(_) => "endpoint",
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout(0)
        } else if err.is_decode() || err.is_body() {
            GenerationError::MalformedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            GenerationError::Service {
                status: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else {
            GenerationError::Connection(err.to_string())
        }
    }
}
