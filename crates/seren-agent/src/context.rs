//! Auxiliary context: folding attachment-derived text into the user
//! message before it reaches the model.

use async_trait::async_trait;

use crate::error::{AgentError, Result};

/// Default budget for appended auxiliary content, in characters.
pub const DEFAULT_AUX_BUDGET: usize = 10_000;

/// One piece of auxiliary text, already extracted from its source.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryText {
    /// Human-readable origin, typically the source filename.
    pub source: String,
    pub content: String,
}

impl AuxiliaryText {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
        }
    }

    /// Rendered length in characters, including the source tag and
    /// separators. The budget is a character count so multibyte text is
    /// not penalized.
    fn rendered_len(&self) -> usize {
        // "\n\n[source: NAME]\nCONTENT"
        "\n\n[source: ]\n".len()
            + self.source.chars().count()
            + self.content.chars().count()
    }
}

/// Extraction seam for binary attachments.
///
/// Implementations turn a raw blob into plain text the model can read.
/// Extraction runs before the turn starts; the orchestrator only ever
/// sees the resulting [`AuxiliaryText`].
#[async_trait]
pub trait AuxiliaryTextProducer: Send + Sync {
    async fn produce(&self, blob: &[u8], filename: &str) -> Result<String>;
}

/// Upload constraints checked before extraction.
#[derive(Debug, Clone)]
pub struct ProcessingLimits {
    /// Maximum accepted file size in bytes.
    pub max_file_size: u64,
    /// Accepted filename extensions, lowercase with leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            allowed_extensions: [".pdf", ".docx", ".txt", ".jpg", ".jpeg", ".png"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ProcessingLimits {
    /// Reject a file before any bytes are processed.
    pub fn check(&self, filename: &str, size: u64) -> Result<()> {
        if size > self.max_file_size {
            return Err(AgentError::UnsupportedInput(format!(
                "{filename} is {size} bytes, limit is {}",
                self.max_file_size
            )));
        }

        let lower = filename.to_lowercase();
        if !self.allowed_extensions.iter().any(|ext| lower.ends_with(ext)) {
            return Err(AgentError::UnsupportedInput(format!(
                "{filename} has an unsupported extension"
            )));
        }
        Ok(())
    }
}

/// Combines the user's text with auxiliary entries under a size budget.
///
/// The user's own text is never truncated. Auxiliary entries are appended
/// whole, in order, until the budget would be exceeded; the remainder is
/// dropped and logged. An entry is never split.
#[derive(Debug, Clone)]
pub struct ContextAugmenter {
    max_aux_len: usize,
}

impl Default for ContextAugmenter {
    fn default() -> Self {
        Self {
            max_aux_len: DEFAULT_AUX_BUDGET,
        }
    }
}

impl ContextAugmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the auxiliary content budget in characters.
    pub fn with_budget(mut self, max_aux_len: usize) -> Self {
        self.max_aux_len = max_aux_len;
        self
    }

    /// Build the augmented user message.
    pub fn augment(&self, user_text: &str, auxiliary: &[AuxiliaryText]) -> String {
        let mut out = user_text.to_string();
        let mut used = 0usize;
        let mut dropped = 0usize;

        // Trailing content goes first: once an entry does not fit,
        // everything after it is dropped too.
        for entry in auxiliary {
            let len = entry.rendered_len();
            if dropped > 0 || used + len > self.max_aux_len {
                dropped += 1;
                continue;
            }
            out.push_str("\n\n[source: ");
            out.push_str(&entry.source);
            out.push_str("]\n");
            out.push_str(&entry.content);
            used += len;
        }

        if dropped > 0 {
            tracing::warn!(
                dropped,
                kept = auxiliary.len() - dropped,
                budget = self.max_aux_len,
                "auxiliary context exceeded budget, dropping entries"
            );
        }
        out
    }
}
