//! Persistence seam for durable conversation storage.
//!
//! The store never touches a database itself. Implement
//! [`PersistenceSink`] to connect it to real storage; [`NoPersistence`]
//! keeps everything in memory and makes resumption an error.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use seren_agent::{MessageSink, SessionId};
use seren_llm::Message;

/// Trait for durable message storage.
///
/// `append_message` is called once per message the orchestrator produces,
/// in history order. `load_history` must return messages oldest first.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Durably append one message to the session's record.
    async fn append_message(&self, session_id: SessionId, message: &Message) -> Result<()>;

    /// Load the full ordered history of a session.
    async fn load_history(&self, session_id: SessionId) -> Result<Vec<Message>>;
}

/// Shared reference to a persistence sink.
pub type SharedPersistence = Arc<dyn PersistenceSink>;

/// No-op persistence: appends succeed silently, loads fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

#[async_trait]
impl PersistenceSink for NoPersistence {
    async fn append_message(&self, _session_id: SessionId, _message: &Message) -> Result<()> {
        Ok(())
    }

    async fn load_history(&self, _session_id: SessionId) -> Result<Vec<Message>> {
        Err(Error::NoPersistence)
    }
}

/// Adapts a [`PersistenceSink`] to the orchestrator's outbound
/// [`MessageSink`] seam.
pub struct SinkAdapter {
    sink: SharedPersistence,
}

impl SinkAdapter {
    pub fn new(sink: SharedPersistence) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MessageSink for SinkAdapter {
    async fn append_message(
        &self,
        session_id: SessionId,
        message: &Message,
    ) -> seren_agent::Result<()> {
        self.sink
            .append_message(session_id, message)
            .await
            .map_err(|e| seren_agent::AgentError::Internal(e.to_string()))
    }
}
