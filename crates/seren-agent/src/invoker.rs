//! Tool invocation: argument validation, dispatch, timeout, and the
//! folding of every failure mode into a tool result the model can read.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::registry::ToolDescriptor;
use seren_llm::ToolCallRequest;
use seren_mcp::{McpError, ServerPool};

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Why a tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// No descriptor registered for the requested name.
    NotFound,
    /// Arguments violated the descriptor's schema, not dispatched.
    InvalidArguments,
    /// The call ran past its deadline.
    Timeout,
    /// The server could not be reached or the connection dropped.
    Transport,
    /// The tool ran and reported an error.
    Execution,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolErrorKind::NotFound => write!(f, "not_found"),
            ToolErrorKind::InvalidArguments => write!(f, "invalid_arguments"),
            ToolErrorKind::Timeout => write!(f, "timeout"),
            ToolErrorKind::Transport => write!(f, "transport"),
            ToolErrorKind::Execution => write!(f, "execution"),
        }
    }
}

/// Outcome of one tool call, success or not.
///
/// Failures carry a human-readable description in `content` so they can
/// be appended to history as a tool message and read by the model on the
/// next round. Invocation never aborts a turn on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    /// The call id this result answers.
    pub call_id: String,
    /// Tool output on success, failure description otherwise.
    pub content: String,
    pub success: bool,
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolCallResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            success: true,
            error_kind: None,
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        kind: ToolErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            content: format!("tool call failed ({kind}): {}", detail.into()),
            success: false,
            error_kind: Some(kind),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor seam
// ─────────────────────────────────────────────────────────────────────────────

/// Dispatch seam between the invoker and the tool servers.
///
/// The invoker owns validation and timeout; implementations only carry
/// the call to its server and return raw text output.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, server: &str, name: &str, arguments: Value) -> Result<String>;
}

/// Shared reference to a tool executor.
pub type SharedExecutor = Arc<dyn ToolExecutor>;

/// Executor backed by a pool of MCP servers.
///
/// `ServerPool` does blocking I/O, so each call moves onto the blocking
/// thread pool.
pub struct McpExecutor {
    pool: Arc<parking_lot::Mutex<ServerPool>>,
}

impl McpExecutor {
    pub fn new(pool: Arc<parking_lot::Mutex<ServerPool>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ToolExecutor for McpExecutor {
    async fn execute(&self, server: &str, name: &str, arguments: Value) -> Result<String> {
        // Grab the client under the lock, call outside it, so sibling
        // calls to different servers actually run concurrently.
        let client = self
            .pool
            .lock()
            .client(server)
            .ok_or_else(|| McpError::transport(format!("server '{server}' is not connected")))?;
        let name = name.to_string();

        let result = tokio::task::spawn_blocking(move || client.call_tool(&name, arguments))
            .await
            .map_err(|e| crate::error::AgentError::Internal(format!("executor task failed: {e}")))??;

        if result.is_error() {
            return Err(McpError::server_error(-1, result.text(), None).into());
        }
        Ok(result.text())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invoker
// ─────────────────────────────────────────────────────────────────────────────

/// Validates, dispatches, and times out individual tool calls.
///
/// Cheap to clone; clones share the executor.
#[derive(Clone)]
pub struct ToolInvoker {
    executor: SharedExecutor,
    timeout: Duration,
}

impl ToolInvoker {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(executor: SharedExecutor) -> Self {
        Self {
            executor,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one tool call to completion.
    ///
    /// Always returns a result, never an error: validation failures,
    /// timeouts, and transport problems all come back as failed results
    /// so the model sees what went wrong.
    pub async fn invoke(&self, descriptor: &ToolDescriptor, call: &ToolCallRequest) -> ToolCallResult {
        if let Err(violation) = validate_arguments(&descriptor.input_schema, &call.arguments) {
            tracing::warn!(
                tool = %call.name,
                call_id = %call.id,
                %violation,
                "rejecting tool call before dispatch"
            );
            return ToolCallResult::failure(&call.id, ToolErrorKind::InvalidArguments, violation);
        }

        tracing::debug!(tool = %call.name, server = %descriptor.server, call_id = %call.id, "dispatching tool call");

        let fut = self
            .executor
            .execute(&descriptor.server, &call.name, call.arguments.clone());

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => ToolCallResult::success(&call.id, output),
            Ok(Err(err)) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %err, "tool call failed");
                ToolCallResult::failure(&call.id, classify(&err), err.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    timeout_secs = self.timeout.as_secs(),
                    "tool call timed out"
                );
                ToolCallResult::failure(
                    &call.id,
                    ToolErrorKind::Timeout,
                    format!("no response within {}s", self.timeout.as_secs()),
                )
            }
        }
    }
}

fn classify(err: &crate::error::AgentError) -> ToolErrorKind {
    match err {
        crate::error::AgentError::Mcp(mcp) => match mcp {
            McpError::ServerError { .. } => ToolErrorKind::Execution,
            McpError::Timeout => ToolErrorKind::Timeout,
            _ => ToolErrorKind::Transport,
        },
        _ => ToolErrorKind::Execution,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema validation
// ─────────────────────────────────────────────────────────────────────────────

/// Check arguments against the schema subset tool servers actually emit:
/// top-level `required` names and primitive `type` tags under
/// `properties`. Unknown properties pass; nested schemas are not
/// descended into.
fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), String> {
    let Some(obj) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let present: HashSet<&str> = obj.keys().map(String::as_str).collect();
        for name in required.iter().filter_map(Value::as_str) {
            if !present.contains(name) {
                return Err(format!("missing required property \"{name}\""));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in obj {
            let Some(expected) = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(format!(
                    "property \"{name}\" should be {expected}, got {}",
                    type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type tag, do not reject.
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
