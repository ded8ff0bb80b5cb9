//! OpenAI-compatible API backend implementation.
//!
//! This module provides `OpenAiBackend` which connects to any service
//! speaking the OpenAI chat-completions protocol. The default target is a
//! local or cloud Ollama instance.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, header};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{EventStream, LlmBackend, StreamEvent};
use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, FinishReason, Message, Role};

/// Default Ollama OpenAI-compatible endpoint.
const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434/v1";

/// Default timeout for requests. Generous because local inference is slow.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication (optional for local services).
    pub api_key: Option<String>,

    /// Base URL for the API.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Name for this backend instance.
    pub name: String,
}

impl OpenAiConfig {
    /// Create a new config for Ollama with default local settings.
    pub fn ollama() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OLLAMA_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            name: "ollama".to_string(),
        }
    }

    /// Create a config from environment variables.
    ///
    /// Reads `OLLAMA_BASE_URL` and `OLLAMA_API_KEY`; both are optional and
    /// default to the local Ollama settings.
    pub fn from_env() -> Self {
        let mut config = Self::ollama();
        if let Ok(base) = std::env::var("OLLAMA_BASE_URL") {
            config.base_url = base;
        }
        if let Ok(key) = std::env::var("OLLAMA_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        config
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the backend name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Backend
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible API backend.
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Unreachable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create an Ollama backend with default local settings.
    pub fn ollama() -> Result<Self> {
        Self::new(OpenAiConfig::ollama())
    }

    /// Build the chat completions endpoint URL.
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// Add authentication headers to a request.
    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");

        if let Some(ref api_key) = self.config.api_key {
            builder.header(header::AUTHORIZATION, format!("Bearer {api_key}"))
        } else {
            builder
        }
    }

    /// Convert a ChatRequest to the OpenAI wire format.
    fn to_openai_request(&self, request: &ChatRequest) -> OpenAiChatRequest {
        let mut messages: Vec<OpenAiMessage> = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for m in &request.messages {
            messages.push(to_openai_message(m));
        }

        let tools: Option<Vec<OpenAiTool>> = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAiTool {
                        tool_type: "function".to_string(),
                        function: OpenAiFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        OpenAiChatRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
            tools,
        }
    }

    /// Map an error response to the protocol's machine-readable kinds.
    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        match status.as_u16() {
            401 | 403 => LlmError::Unauthorized(message),
            429 => LlmError::RateLimited(message),
            400 | 422 => LlmError::MalformedRequest(message),
            _ => LlmError::Unreachable(format!("HTTP {status}: {message}")),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn stream(&self, request: ChatRequest) -> Result<EventStream> {
        let openai_request = self.to_openai_request(&request);

        tracing::debug!(
            backend = %self.config.name,
            model = %openai_request.model,
            messages = openai_request.messages.len(),
            tools = openai_request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "opening streaming completion"
        );

        let response = self
            .add_headers(self.client.post(self.completions_url()))
            .json(&openai_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn health_check(&self) -> Result<()> {
        let models_url = format!("{}/models", self.config.base_url);
        let response = self
            .add_headers(self.client.get(&models_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::handle_error_response(response).await)
        }
    }
}

/// Create a shared OpenAI-compatible backend.
pub fn create_shared_backend(config: OpenAiConfig) -> Result<Arc<dyn LlmBackend>> {
    Ok(Arc::new(OpenAiBackend::new(config)?))
}

/// Convert one conversation message to the OpenAI wire format.
///
/// Tool-result messages become role "tool" with the echoed call id;
/// assistant tool calls carry their arguments re-serialized as a JSON
/// string, as the protocol requires.
fn to_openai_message(m: &Message) -> OpenAiMessage {
    match m.role {
        Role::Tool => OpenAiMessage {
            role: "tool".to_string(),
            content: Some(m.content.clone()),
            tool_calls: None,
            tool_call_id: m.tool_call_id.clone(),
        },
        Role::Assistant if m.has_tool_calls() => OpenAiMessage {
            role: "assistant".to_string(),
            content: if m.content.is_empty() {
                None
            } else {
                Some(m.content.clone())
            },
            tool_calls: Some(
                m.tool_calls
                    .iter()
                    .map(|c| OpenAiToolCall {
                        id: c.id.clone(),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        },
        _ => OpenAiMessage {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => unreachable!(),
            }
            .to_string(),
            content: Some(m.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiError {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Streaming
// ─────────────────────────────────────────────────────────────────────────────

fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> EventStream {
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            pending: VecDeque::new(),
            finish: None,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            // Events queued from an earlier chunk go out first.
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }

            loop {
                // Process complete lines in the buffer
                while let Some(line_end) = state.buffer.find('\n') {
                    let line = state.buffer[..line_end].trim().to_string();
                    state.buffer = state.buffer[line_end + 1..].to_string();

                    if line.is_empty() {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if data == "[DONE]" {
                        state.done = true;
                        let finish = state.finish.unwrap_or(FinishReason::EndTurn);
                        return Some((Ok(StreamEvent::StreamEnd { finish }), state));
                    }

                    let Ok(chunk) = serde_json::from_str::<OpenAiStreamChunk>(data) else {
                        continue;
                    };

                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(reason) = choice.finish_reason {
                        state.finish = Some(match reason.as_str() {
                            "tool_calls" => FinishReason::ToolCalls,
                            "length" => FinishReason::MaxTokens,
                            _ => FinishReason::EndTurn,
                        });
                    }

                    let Some(delta) = choice.delta else {
                        continue;
                    };

                    if let Some(content) = delta.content {
                        if !content.is_empty() {
                            return Some((Ok(StreamEvent::TextDelta(content)), state));
                        }
                    }

                    // One chunk can carry several tool-call fragments;
                    // emit the first now and queue the rest.
                    if let Some(tool_calls) = delta.tool_calls {
                        for tc in tool_calls {
                            let (name, arguments) = match tc.function {
                                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                                None => (None, String::new()),
                            };
                            state.pending.push_back(StreamEvent::ToolCallDelta {
                                index: tc.index.unwrap_or(0),
                                id: tc.id,
                                name,
                                arguments,
                            });
                        }
                        if let Some(event) = state.pending.pop_front() {
                            return Some((Ok(event), state));
                        }
                    }
                }

                // Need more bytes
                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(LlmError::Unreachable(e.to_string())), state));
                    }
                    None => {
                        // Connection closed without a [DONE] marker
                        state.done = true;
                        if state.finish.is_some() {
                            let finish = state.finish.take().unwrap_or(FinishReason::EndTurn);
                            return Some((Ok(StreamEvent::StreamEnd { finish }), state));
                        }
                        return Some((
                            Err(LlmError::Protocol(
                                "stream ended without terminator".to_string(),
                            )),
                            state,
                        ));
                    }
                }
            }
        },
    ))
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
    /// Tool-call fragments decoded but not yet yielded.
    pending: VecDeque<StreamEvent>,
    finish: Option<FinishReason>,
    done: bool,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCallRequest, ToolDefinition};
    use serde_json::json;

    fn sse_bytes(lines: &[&str]) -> Vec<reqwest::Result<Bytes>> {
        lines
            .iter()
            .map(|l| Ok(Bytes::from(format!("{l}\n\n"))))
            .collect()
    }

    async fn collect(events: EventStream) -> Vec<Result<StreamEvent>> {
        events.collect::<Vec<_>>().await
    }

    #[test]
    fn ollama_config_defaults() {
        let config = OpenAiConfig::ollama();
        assert!(config.api_key.is_none());
        assert!(config.base_url.contains("localhost:11434"));
        assert_eq!(config.name, "ollama");
        assert_eq!(config.timeout, Duration::from_secs(600));
    }

    #[test]
    fn config_builder() {
        let config = OpenAiConfig::ollama()
            .with_base_url("https://ollama.com/v1")
            .with_api_key("key")
            .with_name("cloud")
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.base_url, "https://ollama.com/v1");
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.name, "cloud");
    }

    #[test]
    fn completions_url() {
        let backend = OpenAiBackend::ollama().unwrap();
        assert_eq!(
            backend.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn request_conversion_maps_tool_history() {
        let backend = OpenAiBackend::ollama().unwrap();
        let request = ChatRequest::new(
            "gpt-oss:120b-cloud",
            vec![
                Message::user("What's the weather in Boston?"),
                Message::assistant_with_calls(
                    "",
                    vec![ToolCallRequest::new(
                        "call_1",
                        "get_weather",
                        json!({"city": "Boston"}),
                    )],
                ),
                Message::tool_result("call_1", "{\"temp\": 72}"),
            ],
        )
        .with_system("be helpful")
        .with_tools(vec![ToolDefinition::new(
            "get_weather",
            "weather lookup",
            json!({"type": "object"}),
        )]);

        let wire = backend.to_openai_request(&request);
        assert_eq!(wire.messages.len(), 4);
        assert_eq!(wire.messages[0].role, "system");
        assert_eq!(wire.messages[1].role, "user");

        let assistant = &wire.messages[2];
        assert_eq!(assistant.role, "assistant");
        assert!(assistant.content.is_none());
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "get_weather");

        let tool = &wire.messages[3];
        assert_eq!(tool.role, "tool");
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));

        assert_eq!(wire.tools.as_ref().unwrap().len(), 1);
        assert!(wire.stream);
    }

    #[tokio::test]
    async fn sse_text_stream() {
        let chunks = sse_bytes(&[
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]);
        let events = collect(parse_sse_stream(futures::stream::iter(chunks))).await;

        assert_eq!(events.len(), 3);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            StreamEvent::TextDelta("Hel".to_string())
        );
        assert_eq!(
            *events[1].as_ref().unwrap(),
            StreamEvent::TextDelta("lo".to_string())
        );
        assert_eq!(
            *events[2].as_ref().unwrap(),
            StreamEvent::StreamEnd {
                finish: FinishReason::EndTurn
            }
        );
    }

    #[tokio::test]
    async fn sse_tool_call_stream() {
        let chunks = sse_bytes(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Boston\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);
        let events = collect(parse_sse_stream(futures::stream::iter(chunks))).await;

        match events[0].as_ref().unwrap() {
            StreamEvent::ToolCallDelta { index, id, name, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(id.as_deref(), Some("call_1"));
                assert_eq!(name.as_deref(), Some("get_weather"));
            }
            other => panic!("expected tool call delta, got {other:?}"),
        }

        let args: String = events
            .iter()
            .filter_map(|e| match e.as_ref().unwrap() {
                StreamEvent::ToolCallDelta { arguments, .. } => Some(arguments.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&args).unwrap(),
            json!({"city": "Boston"})
        );

        assert_eq!(
            *events.last().unwrap().as_ref().unwrap(),
            StreamEvent::StreamEnd {
                finish: FinishReason::ToolCalls
            }
        );
    }

    #[tokio::test]
    async fn sse_chunk_with_parallel_tool_calls_emits_every_entry() {
        let chunks = sse_bytes(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":"{}"}},{"index":1,"id":"call_2","function":{"name":"get_time","arguments":"{}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);
        let events = collect(parse_sse_stream(futures::stream::iter(chunks))).await;

        let deltas: Vec<(usize, Option<String>)> = events
            .iter()
            .filter_map(|e| match e.as_ref().unwrap() {
                StreamEvent::ToolCallDelta { index, name, .. } => {
                    Some((*index, name.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            deltas,
            vec![
                (0, Some("get_weather".to_string())),
                (1, Some("get_time".to_string())),
            ]
        );
        assert_eq!(
            *events.last().unwrap().as_ref().unwrap(),
            StreamEvent::StreamEnd {
                finish: FinishReason::ToolCalls
            }
        );
    }

    #[tokio::test]
    async fn sse_split_across_chunk_boundaries() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from(r#"data: {"choices":[{"delta":{"con"#)),
            Ok(Bytes::from(
                "tent\":\"hi\"}}]}\n\ndata: [DONE]\n\n".to_string(),
            )),
        ];
        let events = collect(parse_sse_stream(futures::stream::iter(chunks))).await;
        assert_eq!(
            *events[0].as_ref().unwrap(),
            StreamEvent::TextDelta("hi".to_string())
        );
    }

    #[tokio::test]
    async fn sse_missing_terminator_is_protocol_error() {
        let chunks = sse_bytes(&[r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#]);
        let events = collect(parse_sse_stream(futures::stream::iter(chunks))).await;
        assert!(matches!(
            events.last().unwrap(),
            Err(LlmError::Protocol(_))
        ));
    }
}
