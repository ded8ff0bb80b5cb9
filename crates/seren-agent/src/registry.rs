//! Per-session tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use seren_llm::ToolDefinition;
use seren_mcp::ToolInfo;

/// A discovered tool, immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name, unique within the session's registry.
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
    /// Name of the server that owns this tool.
    pub server: String,
}

impl ToolDescriptor {
    /// Render as a tool definition for a model request.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        )
    }
}

/// The set of tools available to one session, keyed by exact name.
///
/// Discovery is additive: each connected server contributes its tools, and
/// re-discovery from the same server replaces that server's entries
/// wholesale. A server claiming a name another server already registered
/// with a different schema is rejected and logged; first registration
/// wins. Contents are cached for the session lifetime and only change on
/// explicit (re)discovery.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a server's reported tool list into the registry.
    ///
    /// Returns the number of descriptors registered from this call.
    pub fn discover(&mut self, server: &str, tools: Vec<ToolInfo>) -> usize {
        // A server's tool list is authoritative only for itself.
        self.tools.retain(|_, d| d.server != server);

        let mut registered = 0;
        for info in tools {
            let schema = info
                .input_schema
                .unwrap_or_else(|| serde_json::json!({"type": "object"}));

            if let Some(existing) = self.tools.get(&info.name) {
                if existing.input_schema == schema {
                    tracing::debug!(
                        tool = %info.name,
                        server,
                        owner = %existing.server,
                        "duplicate tool name with identical schema, keeping first registration"
                    );
                } else {
                    tracing::warn!(
                        tool = %info.name,
                        server,
                        owner = %existing.server,
                        "conflicting tool name with different schema, rejecting"
                    );
                }
                continue;
            }

            self.tools.insert(
                info.name.clone(),
                ToolDescriptor {
                    name: info.name,
                    description: info.description.unwrap_or_default(),
                    input_schema: schema,
                    server: server.to_string(),
                },
            );
            registered += 1;
        }

        tracing::info!(server, registered, total = self.tools.len(), "tool discovery merged");
        registered
    }

    /// Resolve a tool name to its descriptor. Exact match only.
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Tool definitions for a model request, sorted by name so requests
    /// are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(ToolDescriptor::definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

/// Registry shared between a session and its in-flight turns.
///
/// Tool servers connect (and reconnect) while a chat is live, so
/// discovery keeps merging after session creation: discovery takes the
/// write lock, request building and resolution take read locks.
pub type SharedRegistry = Arc<RwLock<ToolRegistry>>;

impl ToolRegistry {
    /// Wrap this registry for sharing with a session and its turns.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(name: &str, schema: Value) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: Some(schema),
        }
    }

    #[test]
    fn discover_and_resolve() {
        let mut registry = ToolRegistry::new();
        let added = registry.discover(
            "weather",
            vec![info("get_weather", json!({"type": "object"}))],
        );
        assert_eq!(added, 1);

        let descriptor = registry.resolve("get_weather").unwrap();
        assert_eq!(descriptor.server, "weather");
        assert!(registry.resolve("get_stock_price").is_none());
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut registry = ToolRegistry::new();
        registry.discover("s", vec![info("t", json!({"type": "object"}))]);

        let first = registry.resolve("t").cloned().unwrap();
        let second = registry.resolve("t").cloned().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rediscovery_replaces_server_wholesale() {
        let mut registry = ToolRegistry::new();
        registry.discover(
            "weather",
            vec![
                info("get_weather", json!({"type": "object"})),
                info("get_forecast", json!({"type": "object"})),
            ],
        );
        assert_eq!(registry.len(), 2);

        // Server now reports a different tool list; the old one is gone.
        registry.discover("weather", vec![info("get_alerts", json!({"type": "object"}))]);
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("get_weather").is_none());
        assert!(registry.resolve("get_alerts").is_some());
    }

    #[test]
    fn rediscovery_keeps_other_servers() {
        let mut registry = ToolRegistry::new();
        registry.discover("a", vec![info("tool_a", json!({"type": "object"}))]);
        registry.discover("b", vec![info("tool_b", json!({"type": "object"}))]);

        registry.discover("a", vec![]);
        assert!(registry.resolve("tool_a").is_none());
        assert!(registry.resolve("tool_b").is_some());
    }

    #[test]
    fn conflicting_name_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.discover(
            "a",
            vec![info("lookup", json!({"type": "object", "required": ["id"]}))],
        );
        registry.discover(
            "b",
            vec![info("lookup", json!({"type": "object", "required": ["key"]}))],
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("lookup").unwrap().server, "a");
    }

    #[test]
    fn shared_registry_sees_later_discovery() {
        let registry = ToolRegistry::new().into_shared();
        let session_view = Arc::clone(&registry);

        // A server connecting after session start merges through the
        // shared handle.
        registry
            .write()
            .discover("weather", vec![info("get_weather", json!({"type": "object"}))]);

        assert!(session_view.read().resolve("get_weather").is_some());
        assert_eq!(session_view.read().len(), 1);
    }

    #[test]
    fn definitions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.discover(
            "s",
            vec![
                info("zeta", json!({"type": "object"})),
                info("alpha", json!({"type": "object"})),
            ],
        );
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
    }
}
