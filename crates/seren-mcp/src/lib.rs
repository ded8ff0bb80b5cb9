//! Tool-discovery protocol client for Seren.
//!
//! Sessions learn their callable tools from one or more tool servers
//! speaking the Model Context Protocol. This crate implements the client
//! side: discovery (`tools/list`) and invocation (`tools/call`) over a
//! pluggable transport.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ServerPool                                                 │
//! │  - named server configs, connect_all, routing by server     │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient (one per server)                                 │
//! │  - initialize handshake, tools/list, tools/call             │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport                                                  │
//! │  - stdio: child process, Content-Length framed JSON-RPC     │
//! │  - http: POST per request                                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The stdio wire format is JSON-RPC 2.0 with Content-Length framing:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! {"jsonrpc": "2.0", "id": 1, "method": "...", "params": {...}}
//! ```

pub mod client;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod transport;

pub use client::{McpClient, ServerConfig, TransportKind};
pub use error::{McpError, Result};
pub use pool::ServerPool;
pub use protocol::{
    CallToolParams, CallToolResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerInfo, ToolContent, ToolInfo,
};
pub use transport::{HttpConfig, Transport};
