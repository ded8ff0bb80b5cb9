//! Error types for tool-server communication.

use thiserror::Error;

/// Result type for tool-server operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for tool-server operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the server process.
    #[error("failed to spawn tool server: {0}")]
    SpawnFailed(String),

    /// Failed to communicate with the server.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error on the stdio pipe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned a JSON-RPC error response.
    #[error("server error {code}: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Handshake not yet performed.
    #[error("server not initialized")]
    NotInitialized,

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response within the deadline.
    #[error("timeout waiting for response")]
    Timeout,
}

impl McpError {
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }
}
