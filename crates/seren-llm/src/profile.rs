//! Chat profile to model identifier mapping.

use std::collections::HashMap;

/// Static table mapping chat profile names to model identifiers.
///
/// An unknown profile resolves to the default model. That substitution is
/// intentional graceful degradation: it is logged, never surfaced as an
/// error. The table is read-mostly and shared across sessions.
#[derive(Debug, Clone)]
pub struct ProfileMap {
    entries: HashMap<String, String>,
    default_model: String,
}

impl ProfileMap {
    /// Create an empty map with the given default model.
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            entries: HashMap::new(),
            default_model: default_model.into(),
        }
    }

    /// Add a profile entry.
    pub fn with_profile(mut self, profile: impl Into<String>, model: impl Into<String>) -> Self {
        self.entries.insert(profile.into(), model.into());
        self
    }

    /// The production profile catalog.
    pub fn catalog() -> Self {
        Self::new("gpt-oss:120b-cloud")
            .with_profile("GPT OSS", "gpt-oss:120b-cloud")
            .with_profile("DeepSeek V3.1", "deepseek-v3.1:671b-cloud")
            .with_profile("Qwen 3 VL", "qwen3-vl:235b-cloud")
            .with_profile("Kimi K2", "kimi-k2:1t-cloud")
            .with_profile("GLM 4.6", "glm-4.6:cloud")
            .with_profile("MiniMax M2", "minimax-m2:cloud")
            .with_profile("Gemini 3 Pro", "gemini-3-pro-preview:latest")
    }

    /// Resolve a profile name to a model identifier.
    ///
    /// Falls back to the default model for unknown profiles, logging the
    /// substitution.
    pub fn resolve(&self, profile: &str) -> &str {
        match self.entries.get(profile) {
            Some(model) => model,
            None => {
                tracing::info!(
                    %profile,
                    default_model = %self.default_model,
                    "unknown chat profile, falling back to default model"
                );
                &self.default_model
            }
        }
    }

    /// The configured default model identifier.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Profile names known to this map.
    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
