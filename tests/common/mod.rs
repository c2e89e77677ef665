//! Shared stub agents and helpers for the end-to-end scenario tests.

use agentbus::agent::{Agent, AgentCore, AgentStateSnapshot};
use agentbus::domain_types::{AgentId, MessageContent};
use agentbus::error::OrchestratorError;
use agentbus::message::{context_keys, Message, MessageType};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Specialist stub that immediately echoes `prefix` + the incoming content back to the sender,
/// forwarding any coordination/task context so the coordinator can match the reply to its
/// in-flight coordination.
pub struct EchoSpecialist {
    core: AgentCore,
    prefix: String,
}

impl EchoSpecialist {
    pub fn new(id: &str, agent_type: &str, prefix: &str) -> Self {
        Self {
            core: AgentCore::new(AgentId::try_new(id).unwrap(), id, agent_type, vec![agent_type.to_string()]),
            prefix: prefix.to_string(),
        }
    }
}

#[async_trait]
impl Agent for EchoSpecialist {
    fn id(&self) -> &AgentId {
        self.core.id()
    }
    fn name(&self) -> &str {
        self.core.name()
    }
    fn agent_type(&self) -> &str {
        self.core.agent_type()
    }
    fn capabilities(&self) -> &[String] {
        self.core.capabilities()
    }
    async fn state(&self) -> AgentStateSnapshot {
        self.core.state().await
    }

    async fn handle_message(&self, message: Message) -> Result<Option<Message>, OrchestratorError> {
        Ok(Some(build_echo_reply(&self.core, &self.prefix, &message)))
    }
}

/// Same as [`EchoSpecialist`], but blocks on `gate` before replying, so a test can control
/// exactly when the coordinator observes this specialist's response.
pub struct GatedSpecialist {
    core: AgentCore,
    prefix: String,
    gate: Arc<Notify>,
}

impl GatedSpecialist {
    pub fn new(id: &str, agent_type: &str, prefix: &str, gate: Arc<Notify>) -> Self {
        Self {
            core: AgentCore::new(AgentId::try_new(id).unwrap(), id, agent_type, vec![agent_type.to_string()]),
            prefix: prefix.to_string(),
            gate,
        }
    }
}

#[async_trait]
impl Agent for GatedSpecialist {
    fn id(&self) -> &AgentId {
        self.core.id()
    }
    fn name(&self) -> &str {
        self.core.name()
    }
    fn agent_type(&self) -> &str {
        self.core.agent_type()
    }
    fn capabilities(&self) -> &[String] {
        self.core.capabilities()
    }
    async fn state(&self) -> AgentStateSnapshot {
        self.core.state().await
    }

    async fn handle_message(&self, message: Message) -> Result<Option<Message>, OrchestratorError> {
        self.gate.notified().await;
        Ok(Some(build_echo_reply(&self.core, &self.prefix, &message)))
    }
}

fn build_echo_reply(core: &AgentCore, prefix: &str, message: &Message) -> Message {
    let content = format!("{prefix}{}", message.content.as_ref());
    let mut builder = Message::builder(core.id().clone(), MessageType::Response, MessageContent::try_new(content).unwrap())
        .to(message.from.clone())
        .reply_to(message.id);
    if let Some(coordination_id) = message.coordination_id() {
        builder = builder.context_entry(context_keys::COORDINATION_ID, serde_json::json!(coordination_id));
    }
    if let Some(task_id) = message.task_id() {
        builder = builder.context_entry(context_keys::TASK_ID, serde_json::json!(task_id));
    }
    builder.build()
}

/// An agent that counts every invocation and replies with a fixed acknowledgement-shaped body,
/// used to exercise the loop-prevention policy's repeat-pair and forbidden-acknowledgement rules.
pub struct CountingAckAgent {
    core: AgentCore,
    calls: Arc<AtomicUsize>,
}

impl CountingAckAgent {
    pub fn new(id: &str, agent_type: &str, calls: Arc<AtomicUsize>) -> Self {
        Self {
            core: AgentCore::new(AgentId::try_new(id).unwrap(), id, agent_type, vec![]),
            calls,
        }
    }
}

#[async_trait]
impl Agent for CountingAckAgent {
    fn id(&self) -> &AgentId {
        self.core.id()
    }
    fn name(&self) -> &str {
        self.core.name()
    }
    fn agent_type(&self) -> &str {
        self.core.agent_type()
    }
    fn capabilities(&self) -> &[String] {
        self.core.capabilities()
    }
    async fn state(&self) -> AgentStateSnapshot {
        self.core.state().await
    }

    async fn handle_message(&self, message: Message) -> Result<Option<Message>, OrchestratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = Message::builder(self.core.id().clone(), MessageType::Response, MessageContent::try_new("response received").unwrap())
            .to(message.from)
            .reply_to(message.id)
            .build();
        Ok(Some(reply))
    }
}

/// Builds a user-response handler that forwards every delivered message onto an unbounded
/// channel, letting a test `.recv()` deterministically instead of polling or sleeping.
pub fn collecting_handler() -> (Arc<dyn Fn(Message) + Send + Sync>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = Arc::new(move |message: Message| {
        let _ = tx.send(message);
    });
    (handler, rx)
}
