//! Model gateway for Seren.
//!
//! This crate provides a unified streaming interface to OpenAI-compatible
//! chat-completion backends (Ollama, OpenAI, and friends) with support for
//! tool calling.
//!
//! # Architecture
//!
//! The core abstraction is the [`LlmBackend`] trait which all providers
//! implement. A turn's conversation history goes in as a [`ChatRequest`];
//! the backend yields an incremental sequence of [`StreamEvent`]s (text
//! deltas, tool-call fragments, end-of-stream).
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  LlmBackend trait                       │
//! │  - stream() -> Stream<StreamEvent>      │
//! └─────────────────────────────────────────┘
//!                    │
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!    ┌──────────┐        ┌──────────┐
//!    │  OpenAI  │        │   Mock   │
//!    │ (Ollama) │        │ (tests)  │
//!    └──────────┘        └──────────┘
//! ```
//!
//! Model selection happens through a [`ProfileMap`]: a static table of chat
//! profile names to model identifiers with a logged fallback to a default
//! model for unknown profiles.

pub mod backend;
pub mod error;
pub mod openai;
pub mod profile;
pub mod types;

pub use backend::{EventStream, LlmBackend, MockBackend, MockTurn, SharedBackend, StreamEvent};
pub use error::{LlmError, Result};
pub use openai::{OpenAiBackend, OpenAiConfig, create_shared_backend};
pub use profile::ProfileMap;
pub use types::{ChatRequest, FinishReason, Message, Role, ToolCallRequest, ToolDefinition};
