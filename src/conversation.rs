//! The conversation agent: the user-facing entry point. Classifies each incoming request as
//! something it can answer directly or something that needs specialist input, in which case it
//! delegates to the coordinator and returns an immediate acknowledgement.

use crate::agent::{Agent, AgentCore, AgentStateSnapshot, with_busy_bracket};
use crate::domain_types::{AgentId, ConversationId, MessageContent, Priority, RecentHistoryWindow, Timestamp};
use crate::error::{ConversationError, OrchestratorError};
use crate::llm::LlmProvider;
use crate::memory_store::MemoryStore;
use crate::message::{context_keys, Message, MessageType};
use crate::orchestrator::Orchestrator;
use crate::task::Task;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const CONVERSATION_AGENT_ID: &str = "conversation";
const COORDINATOR_AGENT_ID: &str = "coordinator";

/// Role of a single turn in a conversation's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConversationRole {
    System,
    User,
    Assistant,
}

/// A single recorded turn.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub content: String,
    pub timestamp: Timestamp,
    pub source_agent: Option<String>,
}

/// Persisted conversation state: the running transcript plus whatever free-form context
/// specialists or the conversation agent itself have accumulated.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationContext {
    pub id: ConversationId,
    pub user_id: String,
    pub started_at: Timestamp,
    pub last_activity_at: Timestamp,
    pub turns: Vec<ConversationTurn>,
    pub context: HashMap<String, serde_json::Value>,
    pub active_agent_ids: Vec<String>,
}

impl ConversationContext {
    fn new(id: ConversationId, user_id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            user_id: user_id.into(),
            started_at: now,
            last_activity_at: now,
            turns: vec![ConversationTurn {
                role: ConversationRole::System,
                content: "conversation started".to_string(),
                timestamp: now,
                source_agent: None,
            }],
            context: HashMap::new(),
            active_agent_ids: Vec::new(),
        }
    }

    fn push_turn(&mut self, role: ConversationRole, content: impl Into<String>, source_agent: Option<String>) {
        self.last_activity_at = Timestamp::now();
        self.turns.push(ConversationTurn {
            role,
            content: content.into(),
            timestamp: self.last_activity_at,
            source_agent,
        });
    }
}

/// Keyword table used to classify an incoming request into one or more specialist categories.
/// A message matching none of these is handled locally rather than delegated.
const SPECIALIST_KEYWORDS: &[(&str, &[&str])] = &[
    ("research", &["research", "look up", "find information", "investigate"]),
    ("task", &["remind me", "todo", "task list", "track this", "create a task"]),
    ("project", &["project plan", "milestone", "roadmap"]),
    ("scheduling", &["schedule", "calendar", "book a meeting", "appointment"]),
    ("communication", &["send an email", "draft a message", "reply to"]),
    ("code", &["write code", "debug", "refactor", "function that"]),
    ("analysis", &["analyze", "compare the data", "statistics"]),
    ("writing", &["write an essay", "draft a document", "proofread"]),
];

/// Categories in `content` matched by [`SPECIALIST_KEYWORDS`], in table order, deduplicated.
#[must_use]
pub fn classify_categories(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    SPECIALIST_KEYWORDS
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|phrase| lower.contains(phrase)))
        .map(|(category, _)| (*category).to_string())
        .collect()
}

fn memory_key(id: &ConversationId) -> String {
    format!("conversation:{id}")
}

/// Strips the reserved `user_response_` prefix and the token's trailing unique suffix, used as a
/// last-resort conversation id when neither an explicit id nor a `user_id` nor a matching prior
/// turn is available.
fn fallback_conversation_id(sender: &AgentId) -> ConversationId {
    let raw = sender.as_ref();
    let stripped = raw.strip_prefix(AgentId::USER_RESPONSE_PREFIX).unwrap_or(raw);
    let base = match stripped.rsplit_once('_') {
        Some((base, _suffix)) => base,
        None => stripped,
    };
    ConversationId::from_user_id(base)
}

/// User-facing agent that resolves conversation identity, classifies requests, and either
/// answers locally via the language model or delegates to the coordinator.
pub struct ConversationAgent {
    core: AgentCore,
    orchestrator: Weak<Orchestrator>,
    memory_store: Arc<dyn MemoryStore>,
    llm: Arc<dyn LlmProvider>,
    recent_history_window: RecentHistoryWindow,
}

impl ConversationAgent {
    #[must_use]
    pub fn new(
        orchestrator: Weak<Orchestrator>,
        memory_store: Arc<dyn MemoryStore>,
        llm: Arc<dyn LlmProvider>,
        recent_history_window: RecentHistoryWindow,
    ) -> Self {
        Self {
            core: AgentCore::new(
                AgentId::try_new(CONVERSATION_AGENT_ID).expect("reserved id is valid"),
                "Conversation",
                "conversation",
                vec![],
            ),
            orchestrator,
            memory_store,
            llm,
            recent_history_window,
        }
    }

    fn orchestrator(&self) -> Option<Arc<Orchestrator>> {
        self.orchestrator.upgrade()
    }

    async fn load_or_create(&self, id: &ConversationId, user_id: &str) -> ConversationContext {
        match self.memory_store.get(&memory_key(id)).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(context) => return context,
                Err(e) => warn!(error = %e, "stored conversation context failed to decode, starting fresh"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to load conversation context"),
        }
        ConversationContext::new(id.clone(), user_id)
    }

    async fn persist(&self, context: &ConversationContext) {
        if let Err(e) = self.memory_store.store(&memory_key(&context.id), serde_json::json!(context)).await {
            warn!(error = %e, "failed to persist conversation context");
        }
    }

    async fn find_conversation_referencing(&self, reply_to: &str) -> Option<ConversationId> {
        let keys = self.memory_store.list("conversation:", 1_000).await.ok()?;
        for key in keys {
            let Ok(Some(value)) = self.memory_store.get(&key).await else { continue };
            let Ok(context) = serde_json::from_value::<ConversationContext>(value) else { continue };
            if context.turns.iter().any(|turn| turn.content.contains(reply_to)) {
                return Some(context.id);
            }
        }
        None
    }

    /// Resolves which conversation an incoming message belongs to, in priority order: an
    /// explicit `conversation_id`, a `user_id`-derived id, a scan for a stored conversation
    /// whose transcript already references this message's `reply_to`, and finally a fallback
    /// derived from the sender's own id.
    async fn resolve_conversation_id(&self, message: &Message) -> ConversationId {
        if let Some(explicit) = message.conversation_id() {
            if let Ok(id) = ConversationId::try_new(explicit.to_string()) {
                return id;
            }
        }

        if let Some(user_id) = message.user_id() {
            return ConversationId::from_user_id(user_id);
        }

        if let Some(reply_to) = message.reply_to {
            if let Some(found) = self.find_conversation_referencing(&reply_to.to_string()).await {
                return found;
            }
        }

        fallback_conversation_id(&message.from)
    }

    async fn specialist_categories_available(&self) -> Vec<String> {
        let Some(orchestrator) = self.orchestrator() else {
            return Vec::new();
        };
        orchestrator
            .list_agents()
            .into_iter()
            .map(|agent| agent.agent_type().to_string())
            .filter(|agent_type| agent_type != "conversation" && agent_type != "coordinator")
            .collect()
    }

    #[instrument(skip(self, message))]
    async fn handle_request(&self, message: Message) -> Result<Option<Message>, ConversationError> {
        if message.message_type != MessageType::Request {
            return Ok(None);
        }

        let conversation_id = self.resolve_conversation_id(&message).await;
        let user_id = message.user_id().unwrap_or(message.from.as_ref()).to_string();
        let mut context = self.load_or_create(&conversation_id, &user_id).await;
        context.push_turn(ConversationRole::User, message.content.as_ref().to_string(), Some(message.from.as_ref().to_string()));
        self.persist(&context).await;

        let available = self.specialist_categories_available().await;
        let matched = if available.is_empty() {
            Vec::new()
        } else {
            classify_categories(message.content.as_ref())
                .into_iter()
                .filter(|category| available.contains(category))
                .collect::<Vec<_>>()
        };

        if matched.is_empty() {
            self.handle_locally(message, conversation_id, context).await
        } else {
            self.delegate(message, conversation_id, matched).await
        }
    }

    async fn handle_locally(
        &self,
        message: Message,
        conversation_id: ConversationId,
        mut context: ConversationContext,
    ) -> Result<Option<Message>, ConversationError> {
        let window = self.recent_history_window.into_inner();
        let recent: Vec<String> = context
            .turns
            .iter()
            .rev()
            .take(window)
            .rev()
            .map(|turn| format!("{:?}: {}", turn.role, turn.content))
            .collect();
        let prompt = recent.join("\n");

        let answer = self
            .llm
            .query(Duration::from_secs(30), &prompt)
            .await
            .map_err(|e| ConversationError::LlmFailure(e.to_string()))?;

        context.push_turn(ConversationRole::Assistant, answer.clone(), Some(self.core.id().as_ref().to_string()));
        self.persist(&context).await;

        Ok(Some(
            Message::builder(self.core.id().clone(), MessageType::Response, MessageContent::try_new(answer).unwrap_or_else(|_| {
                MessageContent::try_new("I don't have a response for that.").expect("non-empty literal")
            }))
            .to(message.from)
            .reply_to(message.id)
            .context_entry(context_keys::CONVERSATION_ID, serde_json::json!(conversation_id.to_string()))
            .final_response()
            .build(),
        ))
    }

    async fn delegate(
        &self,
        message: Message,
        conversation_id: ConversationId,
        specialist_types: Vec<String>,
    ) -> Result<Option<Message>, ConversationError> {
        let orchestrator = self.orchestrator().ok_or(OrchestratorError::NotRunning)?;

        let mut input = HashMap::new();
        input.insert("user_message".to_string(), serde_json::json!(message.content.as_ref()));
        input.insert("conversation_id".to_string(), serde_json::json!(conversation_id.to_string()));
        input.insert("specialist_types".to_string(), serde_json::json!(specialist_types));
        input.insert("response_key".to_string(), serde_json::json!(message.from.as_ref()));

        let mut task = Task::new("user_request", message.content.as_ref().to_string(), Priority::Medium, self.core.id().clone(), input);
        task.assignee = Some(AgentId::try_new(COORDINATOR_AGENT_ID).expect("reserved id is valid"));

        orchestrator.assign_task(task).await?;

        debug!(%conversation_id, "delegated request to coordinator");

        Ok(Some(
            Message::builder(
                self.core.id().clone(),
                MessageType::Response,
                MessageContent::try_new("I'm consulting specialists; I'll get back to you shortly.").expect("non-empty literal"),
            )
            .to(message.from)
            .reply_to(message.id)
            .context_entry(context_keys::CONVERSATION_ID, serde_json::json!(conversation_id.to_string()))
            .acknowledged()
            .build(),
        ))
    }
}

#[async_trait]
impl Agent for ConversationAgent {
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
        with_busy_bracket(&self.core, Some("handling conversation request".to_string()), || {
            self.handle_request(message)
        })
        .await
        .map_err(|e| match e {
            ConversationError::Orchestrator(inner) => inner,
            other => OrchestratorError::AgentHandlerFailure {
                agent_id: self.core.id().clone(),
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_research_keyword() {
        let categories = classify_categories("please research the history of rust");
        assert!(categories.contains(&"research".to_string()));
    }

    #[test]
    fn ordinary_chat_matches_nothing() {
        assert!(classify_categories("how is your day going?").is_empty());
    }

    #[test]
    fn fallback_conversation_id_strips_prefix_and_suffix() {
        let sender = AgentId::try_new("user_response_alice_9f2c9a7e").unwrap();
        let id = fallback_conversation_id(&sender);
        assert_eq!(id.as_ref(), "conv_alice");
    }

    #[test]
    fn memory_key_is_namespaced() {
        let id = ConversationId::from_user_id("u1");
        assert_eq!(memory_key(&id), "conversation:conv_u1");
    }
}
