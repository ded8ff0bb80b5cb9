//! Error types for session store operations.

use seren_agent::SessionId;

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session was not found in cache or storage.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The session is already running a turn.
    #[error("session busy: {0}")]
    Busy(SessionId),

    /// No persistence backend is configured.
    #[error("no persistence backend configured")]
    NoPersistence,

    /// Error from the persistence backend.
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
