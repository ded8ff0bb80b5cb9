//! Conversation orchestration core for Seren.
//!
//! One [`ConversationOrchestrator`] serves one session: it streams model
//! output, detects tool-call requests, executes them against the session's
//! [`ToolRegistry`], folds the results back into the ordered
//! [`ConversationHistory`], and re-invokes the model until it produces a
//! final response.
//!
//! # Turn lifecycle
//!
//! ```text
//!              ┌────────────────┐
//!   user msg ─▶│  AwaitingModel │◀────────────┐
//!              └───────┬────────┘             │
//!                      ▼                      │
//!              ┌────────────────┐    ┌────────┴───────┐
//!              │   Streaming    │───▶│  ToolExecuting │
//!              └───────┬────────┘    └────────────────┘
//!                      ▼
//!              ┌────────────────┐
//!              │  Done / Failed │
//!              └────────────────┘
//! ```
//!
//! The Streaming→ToolExecuting→AwaitingModel cycle is bounded by a
//! configurable round cap. Tool-level failures (unknown name, bad
//! arguments, timeouts) are fed back to the model as failed tool results;
//! only gateway transport errors and the round cap abort a turn.

pub mod context;
pub mod error;
pub mod history;
pub mod invoker;
pub mod orchestrator;
pub mod registry;
pub mod types;

pub use context::{AuxiliaryText, AuxiliaryTextProducer, ContextAugmenter, ProcessingLimits};
pub use error::{AgentError, Result};
pub use history::ConversationHistory;
pub use invoker::{McpExecutor, SharedExecutor, ToolCallResult, ToolErrorKind, ToolExecutor, ToolInvoker};
pub use orchestrator::{
    ConversationOrchestrator, OrchestratorBuilder, OrchestratorConfig, OutboundEvent, TurnStream,
};
pub use registry::{SharedRegistry, ToolDescriptor, ToolRegistry};
pub use seren_mcp::ToolInfo;
pub use types::{MessageSink, SessionId, SharedSink, TurnId};
