//! Client for a single tool server.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, ListToolsResult, ServerInfo, ToolInfo,
};
use crate::transport::{HttpConfig, Transport};

/// How to reach a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Spawn a child process and talk over its pipes.
    #[default]
    Stdio,
    /// POST each request to a remote endpoint.
    Http,
}

/// Configuration for one tool-server connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique name for this server.
    pub name: String,
    pub transport: TransportKind,
    /// Command to spawn (stdio transport).
    pub command: String,
    /// Endpoint URL (HTTP transport).
    pub url: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Extra HTTP headers.
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

impl ServerConfig {
    /// Config for a stdio server.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: command.into(),
            url: None,
            args: Vec::new(),
            env: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            retries: None,
        }
    }

    /// Config for an HTTP server.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Http,
            command: String::new(),
            url: Some(url.into()),
            args: Vec::new(),
            env: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            retries: None,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// A client connected to a single tool server.
///
/// `connect` spawns or dials the server and performs the protocol
/// handshake, so a returned client is immediately usable for
/// `list_tools` and `call_tool`.
pub struct McpClient {
    config: ServerConfig,
    transport: Mutex<Transport>,
    server_info: ServerInfo,
    request_id: AtomicU64,
}

impl McpClient {
    /// Connect to a server and complete the initialize handshake.
    pub fn connect(config: ServerConfig) -> Result<Self> {
        let transport = match config.transport {
            TransportKind::Stdio => {
                let t = Transport::spawn_stdio(&config.command, &config.args, &config.env)?;
                tracing::info!(
                    server = %config.name,
                    command = %config.command,
                    "connected to tool server via stdio"
                );
                t
            }
            TransportKind::Http => {
                let url = config
                    .url
                    .as_ref()
                    .ok_or_else(|| McpError::transport("HTTP transport requires a URL"))?;
                let mut http = HttpConfig::new(url);
                if let Some(timeout) = config.timeout {
                    http = http.with_timeout(timeout);
                }
                if let Some(retries) = config.retries {
                    http = http.with_retries(retries);
                }
                for (key, value) in &config.headers {
                    http = http.with_header(key, value);
                }
                let t = Transport::connect_http(http)?;
                tracing::info!(server = %config.name, url = %url, "connected to tool server via HTTP");
                t
            }
        };

        let mut client = Self {
            config,
            transport: Mutex::new(transport),
            server_info: ServerInfo {
                name: String::new(),
                version: String::new(),
            },
            request_id: AtomicU64::new(1),
        };
        client.initialize()?;
        Ok(client)
    }

    /// The configured server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Identity the server reported during the handshake.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        let response = self.transport.lock().send_request(&request)?;
        response
            .into_result()
            .map_err(|e| McpError::server_error(e.code, e.message, e.data))
    }

    fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport.lock().send_notification(&notification)
    }

    /// Perform the protocol handshake.
    fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams::default();
        let result = self.send_request("initialize", Some(serde_json::to_value(&params)?))?;
        let init: InitializeResult = serde_json::from_value(result)?;

        tracing::info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            "tool server initialized"
        );

        self.send_notification("notifications/initialized", None)?;
        self.server_info = init.server_info;
        Ok(())
    }

    /// List the tools this server exposes.
    ///
    /// The returned order is the server's; registries preserve it.
    pub fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let result = self.send_request("tools/list", None)?;
        let list: ListToolsResult = serde_json::from_value(result)?;

        tracing::debug!(
            server = %self.config.name,
            tool_count = list.tools.len(),
            "listed tools"
        );

        Ok(list.tools)
    }

    /// Invoke a tool by name.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };

        let result = self.send_request("tools/call", Some(serde_json::to_value(&params)?))?;
        let call_result: CallToolResult = serde_json::from_value(result)?;

        if call_result.is_error() {
            tracing::warn!(server = %self.config.name, tool = %name, "tool call returned error");
        } else {
            tracing::debug!(server = %self.config.name, tool = %name, "tool call succeeded");
        }

        Ok(call_result)
    }

    /// Shut the connection down.
    pub fn shutdown(&self) -> Result<()> {
        tracing::info!(server = %self.config.name, "shutting down tool server client");
        self.transport.lock().shutdown()
    }

    /// Whether the server is still reachable.
    pub fn is_connected(&self) -> bool {
        self.transport.lock().is_connected()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
