//! Error types for the model gateway.

use thiserror::Error;

/// Result type alias using the gateway error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Error type for model gateway operations.
///
/// The first four variants mirror the machine-readable error kinds of the
/// streaming protocol: they classify what went wrong between us and the
/// backend. `Protocol` covers responses we could reach but not make sense of.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Backend unreachable (connect failure, timeout, 5xx).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Authentication rejected by the backend.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The backend rejected our request as malformed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The backend sent a response we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Returns true if this error is retryable by an outer policy.
    ///
    /// No retry happens inside the gateway itself; callers that want one
    /// use this to pick candidates.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::RateLimited(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            LlmError::Unreachable(err.to_string())
        } else if err.is_decode() {
            LlmError::Protocol(err.to_string())
        } else {
            LlmError::Unreachable(err.to_string())
        }
    }
}
