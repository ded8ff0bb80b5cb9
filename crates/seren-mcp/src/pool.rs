//! Multi-server lifecycle management.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::client::{McpClient, ServerConfig};
use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, ToolInfo};

/// A pool of tool-server connections.
///
/// Holds named server configurations and the clients connected from them.
/// Connection failures during `connect_all` are logged and skipped so one
/// bad server cannot take down a session's remaining tools.
#[derive(Default)]
pub struct ServerPool {
    configs: HashMap<String, ServerConfig>,
    clients: HashMap<String, Arc<McpClient>>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool with the given server configurations.
    pub fn with_configs(configs: Vec<ServerConfig>) -> Self {
        let mut pool = Self::new();
        for config in configs {
            pool.add_server(config);
        }
        pool
    }

    /// Register a server configuration. Does not connect; replaces any
    /// existing config with the same name.
    pub fn add_server(&mut self, config: ServerConfig) {
        tracing::debug!(server = %config.name, "adding tool server configuration");
        self.configs.insert(config.name.clone(), config);
    }

    /// Remove a server, disconnecting it if connected.
    pub fn remove_server(&mut self, name: &str) -> bool {
        if self.clients.remove(name).is_some() {
            tracing::info!(server = %name, "disconnecting tool server");
        }
        self.configs.remove(name).is_some()
    }

    pub fn has_server(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.get(name).cloned()
    }

    /// Connect every configured server that is not already connected.
    ///
    /// Returns the number of servers connected by this call.
    pub fn connect_all(&mut self) -> usize {
        let mut connected = 0;

        for (name, config) in &self.configs {
            if self.clients.contains_key(name) {
                continue;
            }

            match McpClient::connect(config.clone()) {
                Ok(client) => {
                    self.clients.insert(name.clone(), Arc::new(client));
                    connected += 1;
                    tracing::info!(server = %name, "tool server connected");
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to connect tool server");
                }
            }
        }

        tracing::info!(
            connected,
            total = self.configs.len(),
            "tool server connection complete"
        );
        connected
    }

    /// Connect one server by name, if not already connected.
    pub fn connect_server(&mut self, name: &str) -> Result<()> {
        if self.clients.contains_key(name) {
            return Ok(());
        }

        let config = self
            .configs
            .get(name)
            .ok_or_else(|| McpError::protocol(format!("server '{name}' not configured")))?
            .clone();

        let client = McpClient::connect(config)?;
        self.clients.insert(name.to_string(), Arc::new(client));
        tracing::info!(server = %name, "tool server connected");
        Ok(())
    }

    /// Drop one server's connection and dial it again.
    ///
    /// Used when a session explicitly asks for fresh discovery.
    pub fn reconnect_server(&mut self, name: &str) -> Result<()> {
        self.clients.remove(name);
        self.connect_server(name)
    }

    /// List tools from every connected server, keyed by server name.
    ///
    /// Servers that fail to answer are logged and omitted.
    pub fn list_all_tools(&self) -> HashMap<String, Vec<ToolInfo>> {
        let mut all = HashMap::new();

        for (name, client) in &self.clients {
            match client.list_tools() {
                Ok(tools) => {
                    all.insert(name.clone(), tools);
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to list tools");
                }
            }
        }

        all
    }

    /// Invoke a tool on a specific server.
    pub fn call_tool(&self, server: &str, name: &str, arguments: Value) -> Result<CallToolResult> {
        let client = self
            .client(server)
            .ok_or_else(|| McpError::transport(format!("server '{server}' not connected")))?;
        client.call_tool(name, arguments)
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }

    /// Disconnect every server. Configurations are kept for reconnection.
    pub fn shutdown_all(&mut self) {
        tracing::info!(server_count = self.clients.len(), "shutting down tool servers");
        self.clients.clear();
    }
}

impl std::fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPool")
            .field("configured", &self.configs.keys().collect::<Vec<_>>())
            .field("connected", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}
