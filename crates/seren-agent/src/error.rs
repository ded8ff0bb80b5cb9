//! Error types for the orchestration core.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for orchestration operations.
///
/// Most tool-level failures never surface here: they are folded into
/// failed tool results so the model can react. This enum covers the
/// failures that do abort a turn, plus wrapped lower-layer errors.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model gateway error.
    #[error("model gateway error: {0}")]
    Llm(#[from] seren_llm::LlmError),

    /// Tool server error.
    #[error("tool server error: {0}")]
    Mcp(#[from] seren_mcp::McpError),

    /// No descriptor for the requested tool name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments violate the descriptor's schema.
    #[error("invalid tool arguments: {0}")]
    InvalidToolArgs(String),

    /// The tool-call round cap was exceeded.
    #[error("tool-call round limit of {0} exceeded")]
    MaxToolRounds(u32),

    /// The turn was cancelled.
    #[error("turn cancelled")]
    Cancelled,

    /// Input rejected before processing (size, extension).
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// JSON serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}
