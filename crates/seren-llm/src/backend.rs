//! Backend trait and streaming events for model providers.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, FinishReason};

// ─────────────────────────────────────────────────────────────────────────────
// Stream Events
// ─────────────────────────────────────────────────────────────────────────────

/// An incremental event from a streaming completion.
///
/// Tool calls arrive fragmented: the first delta for an `index` usually
/// carries the call id and function name, later deltas append argument
/// JSON. Consumers accumulate fragments per index until [`StreamEvent::StreamEnd`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    TextDelta(String),

    /// A fragment of a tool-call request.
    ToolCallDelta {
        /// Position of the call within this round; fragments with the same
        /// index belong to the same call.
        index: usize,
        /// Call identifier, present on the first fragment.
        id: Option<String>,
        /// Tool name, present on the first fragment.
        name: Option<String>,
        /// Argument JSON fragment to append.
        arguments: String,
    },

    /// The stream ended cleanly.
    StreamEnd {
        /// Why the model stopped.
        finish: FinishReason,
    },
}

/// A pinned, boxed stream of completion events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

// ─────────────────────────────────────────────────────────────────────────────
// Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait implemented by all model providers.
///
/// Errors surface either from `stream` itself (request rejected before any
/// bytes flowed) or as an `Err` item mid-stream. The gateway never retries;
/// retry policy belongs to the caller.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Open a streaming completion for the given request.
    async fn stream(&self, request: ChatRequest) -> Result<EventStream>;

    /// Name of this backend instance, for logging.
    fn name(&self) -> &str;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared reference to a backend, usable across sessions.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted model turn for [`MockBackend`].
#[derive(Debug)]
pub enum MockTurn {
    /// Yield these events in order, then end.
    Events(Vec<StreamEvent>),
    /// Fail the `stream` call itself with this error.
    Fail(LlmError),
}

impl MockTurn {
    /// A turn that streams the given text then ends normally.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Events(vec![
            StreamEvent::TextDelta(text.into()),
            StreamEvent::StreamEnd {
                finish: FinishReason::EndTurn,
            },
        ])
    }

    /// A turn that requests a single tool call, arguments split across two
    /// fragments the way real backends deliver them.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        let args = arguments.to_string();
        let mut split = args.len() / 2;
        while !args.is_char_boundary(split) {
            split -= 1;
        }
        Self::Events(vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: Some(id.into()),
                name: Some(name.into()),
                arguments: args[..split].to_string(),
            },
            StreamEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: args[split..].to_string(),
            },
            StreamEvent::StreamEnd {
                finish: FinishReason::ToolCalls,
            },
        ])
    }
}

/// Mock backend for testing.
///
/// Pops one scripted turn per `stream` call and records every request it
/// receives so tests can assert on the history that reached the model.
pub struct MockBackend {
    turns: std::sync::Mutex<Vec<MockTurn>>,
    request_log: std::sync::Mutex<Vec<ChatRequest>>,
}

impl MockBackend {
    /// Create a mock that plays the given turns in order.
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: std::sync::Mutex::new(turns),
            request_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.request_log.lock().unwrap().clone()
    }

    /// Number of scripted turns not yet consumed.
    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        self.request_log.lock().unwrap().push(request);

        let turn = {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                return Err(LlmError::Protocol(
                    "mock backend has no scripted turns left".to_string(),
                ));
            }
            turns.remove(0)
        };

        match turn {
            MockTurn::Events(events) => {
                Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
            }
            MockTurn::Fail(err) => Err(err),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
