//! The bus's wire-contract message envelope.
//!
//! `Message` is immutable once constructed (fields are set at build time, never mutated after);
//! any "reply" is a fresh `Message` whose `reply_to` references the original.

use crate::domain_types::{AgentId, MessageContent, MessageId, Priority, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The performative/type of a message, matching the bus's reserved vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Request,
    Response,
    Report,
    Query,
    Command,
    Event,
}

/// Reserved context keys with bus-level semantics. Unrecognized keys remain accessible through
/// the raw `context` map.
pub mod context_keys {
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const TASK_ID: &str = "task_id";
    pub const COORDINATION_ID: &str = "coordination_id";
    pub const USER_ID: &str = "user_id";
    pub const ROLE: &str = "role";
    pub const FINAL_RESPONSE: &str = "final_response";
    pub const ACKNOWLEDGED: &str = "acknowledged";
    pub const RESPONSE_KEY: &str = "response_key";
}

/// A single bus message. Construct via [`MessageBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: AgentId,
    pub to: Vec<AgentId>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: MessageContent,
    pub reply_to: Option<MessageId>,
    pub priority: Priority,
    pub timestamp: Timestamp,
    pub context: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Starts a builder for a new message. `to` must be supplied with at least one recipient
    /// before `build()`; `id`/`timestamp` are assigned automatically.
    #[must_use]
    pub fn builder(from: AgentId, message_type: MessageType, content: MessageContent) -> MessageBuilder {
        MessageBuilder {
            from,
            to: Vec::new(),
            message_type,
            content,
            reply_to: None,
            priority: Priority::default(),
            context: HashMap::new(),
        }
    }

    /// Typed accessor for the `conversation_id` context key.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.context
            .get(context_keys::CONVERSATION_ID)
            .and_then(|v| v.as_str())
    }

    /// Typed accessor for the `task_id` context key.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.context.get(context_keys::TASK_ID).and_then(|v| v.as_str())
    }

    /// Typed accessor for the `coordination_id` context key.
    #[must_use]
    pub fn coordination_id(&self) -> Option<&str> {
        self.context
            .get(context_keys::COORDINATION_ID)
            .and_then(|v| v.as_str())
    }

    /// Typed accessor for the `user_id` context key.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.context.get(context_keys::USER_ID).and_then(|v| v.as_str())
    }

    /// Typed accessor for the `final_response` context key; absent means `false`.
    #[must_use]
    pub fn is_final_response(&self) -> bool {
        self.context
            .get(context_keys::FINAL_RESPONSE)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Typed accessor for the `acknowledged` context key; absent means `false`.
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        self.context
            .get(context_keys::ACKNOWLEDGED)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Typed accessor for the `response_key` context key.
    #[must_use]
    pub fn response_key(&self) -> Option<&str> {
        self.context
            .get(context_keys::RESPONSE_KEY)
            .and_then(|v| v.as_str())
    }
}

/// Fluent builder for [`Message`].
pub struct MessageBuilder {
    from: AgentId,
    to: Vec<AgentId>,
    message_type: MessageType,
    content: MessageContent,
    reply_to: Option<MessageId>,
    priority: Priority,
    context: HashMap<String, serde_json::Value>,
}

impl MessageBuilder {
    /// Appends a recipient.
    #[must_use]
    pub fn to(mut self, recipient: AgentId) -> Self {
        self.to.push(recipient);
        self
    }

    /// Sets the full recipient list, replacing any previously added.
    #[must_use]
    pub fn recipients(mut self, recipients: Vec<AgentId>) -> Self {
        self.to = recipients;
        self
    }

    /// Marks this message as a reply to `original`.
    #[must_use]
    pub fn reply_to(mut self, original: MessageId) -> Self {
        self.reply_to = Some(original);
        self
    }

    /// Sets the priority, defaulting to `Medium` if never called.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Inserts a single context entry.
    #[must_use]
    pub fn context_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Marks this reply as the coordination's terminal response, addressed to a response token.
    #[must_use]
    pub fn final_response(self) -> Self {
        self.context_entry(context_keys::FINAL_RESPONSE, serde_json::Value::Bool(true))
    }

    /// Marks this reply as a pure acknowledgement (does not itself trigger re-routing).
    #[must_use]
    pub fn acknowledged(self) -> Self {
        self.context_entry(context_keys::ACKNOWLEDGED, serde_json::Value::Bool(true))
    }

    /// Finalizes the message, assigning a fresh id and the current timestamp.
    ///
    /// # Panics
    ///
    /// Panics if no recipient was added; every message must target at least one recipient.
    #[must_use]
    pub fn build(self) -> Message {
        assert!(!self.to.is_empty(), "message must have at least one recipient");
        Message {
            id: MessageId::generate(),
            from: self.from,
            to: self.to,
            message_type: self.message_type,
            content: self.content,
            reply_to: self.reply_to,
            priority: self.priority,
            timestamp: Timestamp::now(),
            context: self.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    #[test]
    fn builder_assigns_id_and_timestamp() {
        let msg = Message::builder(
            agent("a"),
            MessageType::Request,
            MessageContent::try_new("hello").unwrap(),
        )
        .to(agent("b"))
        .build();

        assert_eq!(msg.from, agent("a"));
        assert_eq!(msg.to, vec![agent("b")]);
    }

    #[test]
    fn typed_accessors_read_reserved_context_keys() {
        let msg = Message::builder(
            agent("a"),
            MessageType::Response,
            MessageContent::try_new("done").unwrap(),
        )
        .to(agent("user_response_tok"))
        .final_response()
        .context_entry(context_keys::COORDINATION_ID, serde_json::json!("coord_1"))
        .build();

        assert!(msg.is_final_response());
        assert_eq!(msg.coordination_id(), Some("coord_1"));
        assert!(!msg.is_acknowledged());
    }

    #[test]
    #[should_panic(expected = "at least one recipient")]
    fn builder_rejects_empty_recipient_list() {
        let _ = Message::builder(
            agent("a"),
            MessageType::Event,
            MessageContent::try_new("x").unwrap(),
        )
        .build();
    }
}
