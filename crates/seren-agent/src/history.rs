//! Ordered conversation history.

use serde::{Deserialize, Serialize};

use seren_llm::{Message, Role};

/// An append-only, ordered sequence of messages scoped to one session.
///
/// History is the sole conversational state sent to the model on every
/// round. It is never reordered or mutated in place. Causal ordering
/// invariant: a tool-result message immediately follows the assistant
/// message whose tool call it answers, and precedes the next
/// model-generated message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a history from persisted messages, oldest first.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned snapshot of the messages, for building a model request.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Check the causal ordering invariant.
    ///
    /// Every tool message must answer a call requested by the immediately
    /// preceding block of messages: the closest earlier assistant message
    /// must carry a tool call with a matching id, with only other tool
    /// messages in between.
    pub fn is_causally_ordered(&self) -> bool {
        for (i, msg) in self.messages.iter().enumerate() {
            if msg.role != Role::Tool {
                continue;
            }
            let Some(call_id) = msg.tool_call_id.as_deref() else {
                return false;
            };

            // Walk back over sibling tool results to the requesting
            // assistant message.
            let mut j = i;
            let requested = loop {
                if j == 0 {
                    break false;
                }
                j -= 1;
                match self.messages[j].role {
                    Role::Tool => continue,
                    Role::Assistant => {
                        break self.messages[j].tool_calls.iter().any(|c| c.id == call_id);
                    }
                    Role::User => break false,
                }
            };
            if !requested {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seren_llm::ToolCallRequest;
    use serde_json::json;

    #[test]
    fn push_preserves_order() {
        let mut history = ConversationHistory::new();
        history.push(Message::user("hi"));
        history.push(Message::assistant("hello"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].role, Role::User);
        assert_eq!(history.last().unwrap().content, "hello");
    }

    #[test]
    fn causal_order_holds_for_tool_round() {
        let mut history = ConversationHistory::new();
        history.push(Message::user("weather?"));
        history.push(Message::assistant_with_calls(
            "",
            vec![ToolCallRequest::new("call_1", "get_weather", json!({"city": "Boston"}))],
        ));
        history.push(Message::tool_result("call_1", "{\"temp\": 72}"));
        history.push(Message::assistant("It's 72°F in Boston."));

        assert!(history.is_causally_ordered());
    }

    #[test]
    fn causal_order_holds_for_sibling_tools() {
        let mut history = ConversationHistory::new();
        history.push(Message::user("both?"));
        history.push(Message::assistant_with_calls(
            "",
            vec![
                ToolCallRequest::new("call_a", "tool_a", json!({})),
                ToolCallRequest::new("call_b", "tool_b", json!({})),
            ],
        ));
        history.push(Message::tool_result("call_a", "a"));
        history.push(Message::tool_result("call_b", "b"));

        assert!(history.is_causally_ordered());
    }

    #[test]
    fn orphan_tool_message_breaks_order() {
        let mut history = ConversationHistory::new();
        history.push(Message::user("hi"));
        history.push(Message::tool_result("call_1", "out of nowhere"));
        assert!(!history.is_causally_ordered());

        let mut history = ConversationHistory::new();
        history.push(Message::assistant_with_calls(
            "",
            vec![ToolCallRequest::new("call_1", "t", json!({}))],
        ));
        history.push(Message::tool_result("call_2", "wrong id"));
        assert!(!history.is_causally_ordered());
    }

    #[test]
    fn from_messages_round_trips() {
        let msgs = vec![Message::user("a"), Message::assistant("b")];
        let history = ConversationHistory::from_messages(msgs.clone());
        assert_eq!(history.snapshot(), msgs);
    }
}
