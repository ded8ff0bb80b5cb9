//! The per-session turn state machine.
//!
//! [`ConversationOrchestrator::run_turn`] drives one user turn to
//! completion: stream the model, surface text deltas as they arrive,
//! collect tool-call fragments, fan the calls out concurrently, fold
//! their results back into history in request order, and loop until the
//! model answers in plain text or the round cap trips.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt, future::join_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::history::ConversationHistory;
use crate::invoker::{SharedExecutor, ToolCallResult, ToolErrorKind, ToolInvoker};
use crate::registry::SharedRegistry;
use crate::types::{SessionId, SharedSink, TurnId};
use seren_llm::{ChatRequest, Message, SharedBackend, StreamEvent, ToolCallRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Outbound Events
// ─────────────────────────────────────────────────────────────────────────────

/// What a turn emits to its consumer, in order.
///
/// Serializes with a `type` tag so the events can go straight onto a
/// wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A fragment of assistant text, emitted as it streams in.
    TextDelta { text: String },
    /// A tool call is about to run.
    ToolStarted { id: String, name: String },
    /// A tool call finished, successfully or not.
    ToolFinished { id: String, success: bool },
    /// The turn ended with a final assistant message.
    TurnComplete { content: String, rounds: u32 },
    /// The turn aborted; history keeps everything appended so far.
    TurnFailed { error: String },
}

/// A pinned, boxed stream of turn events.
pub type TurnStream = Pin<Box<dyn Stream<Item = OutboundEvent> + Send>>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for a turn.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum model rounds per turn, counting the first.
    pub max_tool_rounds: u32,
    /// Per-tool-call deadline.
    pub tool_timeout: Duration,
    /// System prompt sent ahead of every request.
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            tool_timeout: ToolInvoker::DEFAULT_TIMEOUT,
            system_prompt: None,
            temperature: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_tool_rounds(mut self, max: u32) -> Self {
        self.max_tool_rounds = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`ConversationOrchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    backend: Option<SharedBackend>,
    executor: Option<SharedExecutor>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn with_backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_executor(mut self, executor: SharedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ConversationOrchestrator> {
        let backend = self
            .backend
            .ok_or_else(|| AgentError::Internal("orchestrator requires a backend".to_string()))?;
        let executor = self
            .executor
            .ok_or_else(|| AgentError::Internal("orchestrator requires an executor".to_string()))?;
        let invoker = ToolInvoker::new(executor).with_timeout(self.config.tool_timeout);
        Ok(ConversationOrchestrator {
            backend,
            invoker,
            config: self.config,
        })
    }
}

/// Drives turns for one session.
pub struct ConversationOrchestrator {
    backend: SharedBackend,
    invoker: ToolInvoker,
    config: OrchestratorConfig,
}

/// A tool call being reassembled from stream fragments.
#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl ConversationOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Run one user turn, returning its event stream.
    ///
    /// The history is shared so appends survive the stream being dropped
    /// mid-turn. Cancellation never rolls anything back; whatever was
    /// appended before the cancel stays.
    #[allow(clippy::too_many_arguments)]
    pub fn run_turn(
        &self,
        session_id: SessionId,
        history: Arc<Mutex<ConversationHistory>>,
        registry: SharedRegistry,
        model: String,
        user_message: String,
        cancellation: CancellationToken,
        sink: Option<SharedSink>,
    ) -> TurnStream {
        let backend = Arc::clone(&self.backend);
        let invoker = self.invoker.clone();
        let config = self.config.clone();
        let turn_id = TurnId::new();

        Box::pin(stream! {
            tracing::info!(session = %session_id, turn = %turn_id, %model, "turn started");

            let user = Message::user(user_message);
            history.lock().push(user.clone());
            append_to_sink(&sink, session_id, &user).await;

            let mut rounds = 0u32;

            loop {
                if cancellation.is_cancelled() {
                    tracing::info!(session = %session_id, turn = %turn_id, "turn cancelled");
                    yield OutboundEvent::TurnFailed { error: AgentError::Cancelled.to_string() };
                    return;
                }

                rounds += 1;
                if rounds > config.max_tool_rounds {
                    let err = AgentError::MaxToolRounds(config.max_tool_rounds);
                    tracing::warn!(session = %session_id, turn = %turn_id, rounds, "aborting turn: {err}");
                    yield OutboundEvent::TurnFailed { error: err.to_string() };
                    return;
                }

                let mut request = ChatRequest::new(model.clone(), history.lock().snapshot())
                    .with_tools(registry.read().definitions());
                if let Some(prompt) = &config.system_prompt {
                    request = request.with_system(prompt.clone());
                }
                if let Some(temperature) = config.temperature {
                    request = request.with_temperature(temperature);
                }

                let mut events = match backend.stream(request).await {
                    Ok(events) => events,
                    Err(err) => {
                        tracing::error!(session = %session_id, turn = %turn_id, error = %err, "model request failed");
                        yield OutboundEvent::TurnFailed { error: AgentError::Llm(err).to_string() };
                        return;
                    }
                };

                let mut text = String::new();
                let mut pending: BTreeMap<usize, PendingCall> = BTreeMap::new();
                let mut failed: Option<AgentError> = None;

                loop {
                    if cancellation.is_cancelled() {
                        tracing::info!(session = %session_id, turn = %turn_id, "turn cancelled mid-stream");
                        yield OutboundEvent::TurnFailed { error: AgentError::Cancelled.to_string() };
                        return;
                    }

                    match events.next().await {
                        Some(Ok(StreamEvent::TextDelta(delta))) => {
                            text.push_str(&delta);
                            yield OutboundEvent::TextDelta { text: delta };
                        }
                        Some(Ok(StreamEvent::ToolCallDelta { index, id, name, arguments })) => {
                            let call = pending.entry(index).or_default();
                            if let Some(id) = id {
                                call.id = id;
                            }
                            if let Some(name) = name {
                                call.name = name;
                            }
                            call.arguments.push_str(&arguments);
                        }
                        Some(Ok(StreamEvent::StreamEnd { .. })) => break,
                        Some(Err(err)) => {
                            failed = Some(AgentError::Llm(err));
                            break;
                        }
                        None => {
                            failed = Some(AgentError::Internal(
                                "model stream ended without terminator".to_string(),
                            ));
                            break;
                        }
                    }
                }

                if let Some(err) = failed {
                    tracing::error!(session = %session_id, turn = %turn_id, error = %err, "model stream failed");
                    yield OutboundEvent::TurnFailed { error: err.to_string() };
                    return;
                }

                if pending.is_empty() {
                    // Final round: plain assistant text, turn is done.
                    let message = Message::assistant(text.clone());
                    history.lock().push(message.clone());
                    append_to_sink(&sink, session_id, &message).await;
                    tracing::info!(session = %session_id, turn = %turn_id, rounds, "turn complete");
                    yield OutboundEvent::TurnComplete { content: text, rounds };
                    return;
                }

                // Reassemble the call requests in index order. A call with
                // unparseable argument JSON still enters history so the
                // model can see its own request fail.
                let mut calls: Vec<ToolCallRequest> = Vec::with_capacity(pending.len());
                let mut parse_errors: Vec<Option<String>> = Vec::with_capacity(pending.len());
                for call in pending.into_values() {
                    let (arguments, error) = if call.arguments.trim().is_empty() {
                        (serde_json::json!({}), None)
                    } else {
                        match serde_json::from_str(&call.arguments) {
                            Ok(value) => (value, None),
                            Err(err) => (
                                serde_json::json!({}),
                                Some(format!("arguments are not valid JSON: {err}")),
                            ),
                        }
                    };
                    calls.push(ToolCallRequest::new(call.id, call.name, arguments));
                    parse_errors.push(error);
                }

                let assistant = Message::assistant_with_calls(text, calls.clone());
                history.lock().push(assistant.clone());
                append_to_sink(&sink, session_id, &assistant).await;

                for call in &calls {
                    yield OutboundEvent::ToolStarted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                    };
                }

                // Fan out concurrently; join_all keeps request order.
                let futures = calls
                    .iter()
                    .zip(&parse_errors)
                    .map(|(call, parse_error)| {
                        let invoker = invoker.clone();
                        let registry = Arc::clone(&registry);
                        let call = call.clone();
                        let parse_error = parse_error.clone();
                        async move {
                            if let Some(detail) = parse_error {
                                return ToolCallResult::failure(
                                    &call.id,
                                    ToolErrorKind::InvalidArguments,
                                    detail,
                                );
                            }
                            let descriptor = registry.read().resolve(&call.name).cloned();
                            match descriptor {
                                Some(descriptor) => invoker.invoke(&descriptor, &call).await,
                                None => ToolCallResult::failure(
                                    &call.id,
                                    ToolErrorKind::NotFound,
                                    format!("no tool named \"{}\"", call.name),
                                ),
                            }
                        }
                    })
                    .collect::<Vec<_>>();
                let results = join_all(futures).await;

                for result in results {
                    yield OutboundEvent::ToolFinished {
                        id: result.call_id.clone(),
                        success: result.success,
                    };
                    let message = Message::tool_result(result.call_id, result.content);
                    history.lock().push(message.clone());
                    append_to_sink(&sink, session_id, &message).await;
                }
                // Back to the model with the results folded in.
            }
        })
    }
}

/// Append to the durable sink if one is attached. Sink failures are
/// logged, never fatal; in-memory history stays authoritative.
async fn append_to_sink(sink: &Option<SharedSink>, session_id: SessionId, message: &Message) {
    if let Some(sink) = sink {
        if let Err(err) = sink.append_message(session_id, message).await {
            tracing::warn!(session = %session_id, error = %err, "sink append failed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::ToolExecutor;
    use crate::registry::ToolRegistry;
    use crate::types::MessageSink;
    use async_trait::async_trait;
    use seren_llm::{FinishReason, LlmError, MockBackend, MockTurn, Role};
    use seren_mcp::ToolInfo;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    /// Executor with canned per-tool responses, optional per-tool delay,
    /// and a call log.
    struct TestExecutor {
        responses: HashMap<String, String>,
        delays: HashMap<String, Duration>,
        calls: Mutex<Vec<String>>,
    }

    impl TestExecutor {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                delays: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn respond(mut self, name: &str, output: &str) -> Self {
            self.responses.insert(name.to_string(), output.to_string());
            self
        }

        fn delay(mut self, name: &str, delay: Duration) -> Self {
            self.delays.insert(name.to_string(), delay);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ToolExecutor for TestExecutor {
        async fn execute(&self, _server: &str, name: &str, _arguments: Value) -> Result<String> {
            self.calls.lock().push(name.to_string());
            if let Some(delay) = self.delays.get(name) {
                tokio::time::sleep(*delay).await;
            }
            self.responses
                .get(name)
                .cloned()
                .ok_or_else(|| AgentError::Internal(format!("unscripted tool {name}")))
        }
    }

    fn weather_registry() -> SharedRegistry {
        let mut registry = ToolRegistry::new();
        registry.discover(
            "weather",
            vec![ToolInfo {
                name: "get_weather".to_string(),
                description: Some("Current weather for a city".to_string()),
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                })),
            }],
        );
        registry.into_shared()
    }

    struct Fixture {
        backend: Arc<MockBackend>,
        executor: Arc<TestExecutor>,
        orchestrator: ConversationOrchestrator,
        history: Arc<Mutex<ConversationHistory>>,
        registry: SharedRegistry,
    }

    fn fixture(turns: Vec<MockTurn>, executor: TestExecutor, config: OrchestratorConfig) -> Fixture {
        let backend = Arc::new(MockBackend::new(turns));
        let executor = Arc::new(executor);
        let orchestrator = ConversationOrchestrator::builder()
            .with_backend(backend.clone())
            .with_executor(executor.clone())
            .with_config(config)
            .build()
            .unwrap();
        Fixture {
            backend,
            executor,
            orchestrator,
            history: Arc::new(Mutex::new(ConversationHistory::new())),
            registry: weather_registry(),
        }
    }

    async fn collect(fx: &Fixture, user: &str, token: CancellationToken) -> Vec<OutboundEvent> {
        fx.orchestrator
            .run_turn(
                SessionId::new(),
                fx.history.clone(),
                fx.registry.clone(),
                "test-model".to_string(),
                user.to_string(),
                token,
                None,
            )
            .collect()
            .await
    }

    #[tokio::test]
    async fn tool_round_then_final_answer() {
        let fx = fixture(
            vec![
                MockTurn::tool_call("call_1", "get_weather", &json!({"city": "Boston"})),
                MockTurn::text("It's 72°F in Boston."),
            ],
            TestExecutor::new().respond("get_weather", "{\"temp\": 72}"),
            OrchestratorConfig::default(),
        );

        let events = collect(&fx, "weather in Boston?", CancellationToken::new()).await;

        assert_eq!(
            events,
            vec![
                OutboundEvent::ToolStarted {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string()
                },
                OutboundEvent::ToolFinished {
                    id: "call_1".to_string(),
                    success: true
                },
                OutboundEvent::TextDelta {
                    text: "It's 72°F in Boston.".to_string()
                },
                OutboundEvent::TurnComplete {
                    content: "It's 72°F in Boston.".to_string(),
                    rounds: 2
                },
            ]
        );

        let history = fx.history.lock();
        assert_eq!(history.len(), 4);
        assert_eq!(history.messages()[0].role, Role::User);
        assert!(history.messages()[1].has_tool_calls());
        assert_eq!(history.messages()[2].role, Role::Tool);
        assert_eq!(history.messages()[3].content, "It's 72°F in Boston.");
        assert!(history.is_causally_ordered());
        drop(history);

        // The second request carried the tool result back to the model.
        let requests = fx.backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[2].content, "{\"temp\": 72}");
        assert_eq!(fx.executor.calls(), vec!["get_weather"]);
    }

    #[tokio::test]
    async fn unknown_tool_feeds_failure_back() {
        let fx = fixture(
            vec![
                MockTurn::tool_call("call_1", "get_stock_price", &json!({"symbol": "ACME"})),
                MockTurn::text("I don't have a stock tool."),
            ],
            TestExecutor::new(),
            OrchestratorConfig::default(),
        );

        let events = collect(&fx, "ACME price?", CancellationToken::new()).await;

        assert!(events.contains(&OutboundEvent::ToolFinished {
            id: "call_1".to_string(),
            success: false
        }));
        assert!(matches!(events.last(), Some(OutboundEvent::TurnComplete { .. })));

        // The failed result reached the model as a tool message.
        let requests = fx.backend.requests();
        assert_eq!(requests[1].messages[2].role, Role::Tool);
        assert!(requests[1].messages[2].content.contains("not_found"));
        assert!(fx.executor.calls().is_empty());
        assert!(fx.history.lock().is_causally_ordered());
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_executor() {
        let fx = fixture(
            vec![
                MockTurn::tool_call("call_1", "get_weather", &json!({})),
                MockTurn::text("I need a city name."),
            ],
            TestExecutor::new().respond("get_weather", "unused"),
            OrchestratorConfig::default(),
        );

        let events = collect(&fx, "weather?", CancellationToken::new()).await;

        assert!(events.contains(&OutboundEvent::ToolFinished {
            id: "call_1".to_string(),
            success: false
        }));
        assert!(fx.executor.calls().is_empty());
        assert!(
            fx.backend.requests()[1].messages[2]
                .content
                .contains("city")
        );
    }

    #[tokio::test]
    async fn round_cap_aborts_runaway_turn() {
        let turns = (0..4)
            .map(|i| MockTurn::tool_call(format!("call_{i}"), "get_weather", &json!({"city": "Boston"})))
            .collect();
        let fx = fixture(
            turns,
            TestExecutor::new().respond("get_weather", "{\"temp\": 72}"),
            OrchestratorConfig::default().with_max_tool_rounds(3),
        );

        let events = collect(&fx, "weather?", CancellationToken::new()).await;

        match events.last() {
            Some(OutboundEvent::TurnFailed { error }) => {
                assert!(error.contains("round limit"));
            }
            other => panic!("expected TurnFailed, got {other:?}"),
        }
        assert_eq!(fx.backend.requests().len(), 3);
        // Everything appended before the abort stays.
        assert!(fx.history.lock().is_causally_ordered());
    }

    #[tokio::test]
    async fn gateway_failure_aborts_turn() {
        let fx = fixture(
            vec![MockTurn::Fail(LlmError::Unreachable("connection refused".to_string()))],
            TestExecutor::new(),
            OrchestratorConfig::default(),
        );

        let events = collect(&fx, "hello", CancellationToken::new()).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            OutboundEvent::TurnFailed { error } => assert!(error.contains("connection refused")),
            other => panic!("expected TurnFailed, got {other:?}"),
        }
        // The user message was already appended.
        assert_eq!(fx.history.lock().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_turn_keeps_appended_history() {
        let fx = fixture(
            vec![MockTurn::text("never streamed")],
            TestExecutor::new(),
            OrchestratorConfig::default(),
        );
        let token = CancellationToken::new();
        token.cancel();

        let events = collect(&fx, "hello", token).await;

        assert_eq!(
            events,
            vec![OutboundEvent::TurnFailed {
                error: "turn cancelled".to_string()
            }]
        );
        let history = fx.history.lock();
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, Role::User);
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_tool_results_keep_request_order() {
        let mut registry = ToolRegistry::new();
        registry.discover(
            "s",
            vec![
                ToolInfo {
                    name: "slow_tool".to_string(),
                    description: None,
                    input_schema: Some(json!({"type": "object"})),
                },
                ToolInfo {
                    name: "fast_tool".to_string(),
                    description: None,
                    input_schema: Some(json!({"type": "object"})),
                },
            ],
        );

        let mut fx = fixture(
            vec![
                MockTurn::Events(vec![
                    StreamEvent::ToolCallDelta {
                        index: 0,
                        id: Some("call_a".to_string()),
                        name: Some("slow_tool".to_string()),
                        arguments: "{}".to_string(),
                    },
                    StreamEvent::ToolCallDelta {
                        index: 1,
                        id: Some("call_b".to_string()),
                        name: Some("fast_tool".to_string()),
                        arguments: "{}".to_string(),
                    },
                    StreamEvent::StreamEnd {
                        finish: FinishReason::ToolCalls,
                    },
                ]),
                MockTurn::text("done"),
            ],
            TestExecutor::new()
                .respond("slow_tool", "slow output")
                .respond("fast_tool", "fast output")
                .delay("slow_tool", Duration::from_secs(2)),
            OrchestratorConfig::default(),
        );
        fx.registry = registry.into_shared();

        let events = collect(&fx, "both please", CancellationToken::new()).await;

        let finished: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::ToolFinished { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["call_a", "call_b"]);

        // History interleaves results in request order, not finish order.
        let history = fx.history.lock();
        assert_eq!(history.messages()[2].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(history.messages()[3].tool_call_id.as_deref(), Some("call_b"));
        assert!(history.is_causally_ordered());
    }

    #[tokio::test]
    async fn malformed_argument_json_becomes_failed_result() {
        let fx = fixture(
            vec![
                MockTurn::Events(vec![
                    StreamEvent::ToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        name: Some("get_weather".to_string()),
                        arguments: "{\"city\": ".to_string(),
                    },
                    StreamEvent::StreamEnd {
                        finish: FinishReason::ToolCalls,
                    },
                ]),
                MockTurn::text("let me try again"),
            ],
            TestExecutor::new().respond("get_weather", "unused"),
            OrchestratorConfig::default(),
        );

        let events = collect(&fx, "weather?", CancellationToken::new()).await;

        assert!(events.contains(&OutboundEvent::ToolFinished {
            id: "call_1".to_string(),
            success: false
        }));
        assert!(fx.executor.calls().is_empty());
        assert!(
            fx.backend.requests()[1].messages[2]
                .content
                .contains("not valid JSON")
        );
        assert!(fx.history.lock().is_causally_ordered());
    }

    #[tokio::test]
    async fn plain_text_turn_streams_deltas() {
        let fx = fixture(
            vec![MockTurn::Events(vec![
                StreamEvent::TextDelta("Hel".to_string()),
                StreamEvent::TextDelta("lo!".to_string()),
                StreamEvent::StreamEnd {
                    finish: FinishReason::EndTurn,
                },
            ])],
            TestExecutor::new(),
            OrchestratorConfig::default(),
        );

        let events = collect(&fx, "hi", CancellationToken::new()).await;

        assert_eq!(
            events,
            vec![
                OutboundEvent::TextDelta { text: "Hel".to_string() },
                OutboundEvent::TextDelta { text: "lo!".to_string() },
                OutboundEvent::TurnComplete {
                    content: "Hello!".to_string(),
                    rounds: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn late_connected_server_reaches_running_session() {
        let mut fx = fixture(
            vec![
                MockTurn::tool_call("call_1", "get_weather", &json!({"city": "Boston"})),
                MockTurn::text("It's 72°F in Boston."),
            ],
            TestExecutor::new().respond("get_weather", "{\"temp\": 72}"),
            OrchestratorConfig::default(),
        );
        fx.registry = ToolRegistry::new().into_shared();

        // The server connects only after the registry is already shared
        // with the session; discovery merges through the same handle the
        // turn reads from.
        fx.registry.write().discover(
            "weather",
            vec![ToolInfo {
                name: "get_weather".to_string(),
                description: None,
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                })),
            }],
        );

        let events = collect(&fx, "weather in Boston?", CancellationToken::new()).await;

        assert!(events.contains(&OutboundEvent::ToolFinished {
            id: "call_1".to_string(),
            success: true
        }));
        assert!(matches!(events.last(), Some(OutboundEvent::TurnComplete { .. })));
        assert_eq!(fx.executor.calls(), vec!["get_weather"]);
    }

    struct RecordingSink {
        messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn append_message(&self, _session_id: SessionId, message: &Message) -> Result<()> {
            self.messages.lock().push(message.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sink_receives_every_message_in_history_order() {
        let fx = fixture(
            vec![
                MockTurn::tool_call("call_1", "get_weather", &json!({"city": "Boston"})),
                MockTurn::text("It's 72°F in Boston."),
            ],
            TestExecutor::new().respond("get_weather", "{\"temp\": 72}"),
            OrchestratorConfig::default(),
        );
        let sink = Arc::new(RecordingSink {
            messages: Mutex::new(Vec::new()),
        });

        let events: Vec<OutboundEvent> = fx
            .orchestrator
            .run_turn(
                SessionId::new(),
                fx.history.clone(),
                fx.registry.clone(),
                "test-model".to_string(),
                "weather in Boston?".to_string(),
                CancellationToken::new(),
                Some(sink.clone()),
            )
            .collect()
            .await;

        assert!(matches!(events.last(), Some(OutboundEvent::TurnComplete { .. })));

        // The sink saw exactly what history recorded, in the same order.
        let recorded = sink.messages.lock().clone();
        assert_eq!(recorded.len(), 4);
        assert_eq!(recorded, fx.history.lock().snapshot());
        assert_eq!(recorded[0].role, Role::User);
        assert_eq!(recorded[1].tool_calls[0].name, "get_weather");
        assert_eq!(recorded[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(recorded[3].content, "It's 72°F in Boston.");
    }

    #[test]
    fn outbound_events_serialize_with_type_tag() {
        let event = OutboundEvent::TextDelta {
            text: "hi".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "text_delta");

        let event = OutboundEvent::TurnFailed {
            error: "turn cancelled".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "turn_failed");
    }
}
