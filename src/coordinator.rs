//! The coordinator agent: fans a user request out to specialist agents and fans their replies
//! back in to a single synthesized answer.

use crate::agent::{Agent, AgentCore, AgentState, AgentStateSnapshot, with_busy_bracket};
use crate::domain_types::{AgentId, CoordinationId, ConversationId, MessageContent, Priority, ResponseToken, TaskId, Timestamp};
use crate::error::{CoordinatorError, OrchestratorError};
use crate::llm::LlmProvider;
use crate::memory_store::MemoryStore;
use crate::message::{context_keys, Message, MessageType};
use crate::orchestrator::Orchestrator;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const COORDINATOR_ID: &str = "coordinator";

/// Generic help-desk replies that specialists sometimes send unsolicited; these carry no
/// `coordination_id` and are dropped rather than treated as stray responses worth logging.
const GENERIC_HELP_PHRASES: &[&str] = &[
    "would you like to:",
    "thank you for confirming",
    "let me know what's on your mind",
];

const DEFAULT_SPECIALIST_TYPES: &[&str] = &["research", "task"];

/// Lifecycle status of a single fan-out/fan-in coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CoordinationStatus {
    InProgress,
    Completed,
}

/// State tracked for one in-flight coordination: which specialists were asked, which have
/// replied, and what to do once every reply is in.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Coordination {
    pub id: CoordinationId,
    pub task_id: TaskId,
    pub user_message: String,
    pub conversation_id: Option<ConversationId>,
    pub specialist_types: Vec<String>,
    pub specialist_ids: Vec<AgentId>,
    /// Specialist replies keyed by the sender's agent id (as a plain string, not `AgentId`
    /// itself — serde map keys on a validated newtype are unproven territory here, and a plain
    /// `String` key matches how `Message::context` is already keyed elsewhere).
    pub responses: HashMap<String, String>,
    pub status: CoordinationStatus,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub requester_token: ResponseToken,
    pub final_content: Option<String>,
}

/// Guards a single [`Coordination`] against being finalized twice when two specialist replies
/// race to complete the response set.
#[derive(Clone)]
struct CoordinationGuard {
    state: Arc<Mutex<Coordination>>,
    completed: Arc<AtomicBool>,
}

/// Fans a conversation request out to specialist agents, then synthesizes their replies into one
/// final answer once all have responded.
pub struct CoordinatorAgent {
    core: AgentCore,
    orchestrator: Weak<Orchestrator>,
    memory_store: Arc<dyn MemoryStore>,
    llm: Arc<dyn LlmProvider>,
    coordinations: DashMap<CoordinationId, CoordinationGuard>,
}

impl CoordinatorAgent {
    /// Builds the coordinator under its reserved id. `orchestrator` is a weak back-reference:
    /// the coordinator never keeps the orchestrator alive.
    #[must_use]
    pub fn new(orchestrator: Weak<Orchestrator>, memory_store: Arc<dyn MemoryStore>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            core: AgentCore::new(
                AgentId::try_new(COORDINATOR_ID).expect("reserved id is valid"),
                "Coordinator",
                "coordinator",
                vec![],
            ),
            orchestrator,
            memory_store,
            llm,
            coordinations: DashMap::new(),
        }
    }

    fn orchestrator(&self) -> Option<Arc<Orchestrator>> {
        self.orchestrator.upgrade()
    }

    async fn route_incoming(&self, message: Message) -> Result<Option<Message>, CoordinatorError> {
        if message.message_type == MessageType::Request {
            if let Some(task_id) = message.task_id().and_then(parse_task_id) {
                return self.start_coordination(task_id).await;
            }
        }

        if message.coordination_id().is_some() {
            return self.record_response(message).await;
        }

        if is_unsolicited_help_reply(&message) {
            debug!("dropping unsolicited specialist reply with no coordination id");
            return Ok(None);
        }

        Ok(None)
    }

    #[instrument(skip(self))]
    async fn start_coordination(&self, task_id: TaskId) -> Result<Option<Message>, CoordinatorError> {
        let orchestrator = self.orchestrator().ok_or(OrchestratorError::NotRunning)?;
        let task = orchestrator.get_task_status(task_id).await?;

        let user_message = task
            .input
            .get("user_message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&task.description)
            .to_string();

        let conversation_id = task
            .input
            .get("conversation_id")
            .and_then(serde_json::Value::as_str)
            .map(|s| ConversationId::try_new(s.to_string()))
            .and_then(Result::ok);

        let specialist_types: Vec<String> = task
            .input
            .get("specialist_types")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .unwrap_or_else(|| DEFAULT_SPECIALIST_TYPES.iter().map(|s| (*s).to_string()).collect());

        let requester_token = task
            .input
            .get("response_key")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| ResponseToken::try_new(s.to_string()).ok())
            .ok_or_else(|| OrchestratorError::DecodeError {
                record: "task.input.response_key".to_string(),
                reason: "missing or invalid response token".to_string(),
            })?;

        let coordination_id = CoordinationId::for_task(task_id);

        let mut specialist_ids = Vec::new();
        for specialist_type in &specialist_types {
            if let Some(specialist) = orchestrator.find_agents_by_type(specialist_type).into_iter().next() {
                let request = Message::builder(
                    self.core.id().clone(),
                    MessageType::Request,
                    MessageContent::try_new(user_message.clone()).unwrap_or_else(|_| {
                        MessageContent::try_new("please assist with this request").expect("non-empty literal")
                    }),
                )
                .to(specialist.id().clone())
                .context_entry(context_keys::COORDINATION_ID, serde_json::json!(coordination_id.to_string()))
                .context_entry(context_keys::TASK_ID, serde_json::json!(task_id.to_string()))
                .build();

                specialist_ids.push(specialist.id().clone());
                if let Err(e) = orchestrator.route_message(request).await {
                    warn!(specialist = %specialist.id(), error = %e, "failed to route coordination request");
                }
            } else {
                warn!(specialist_type, "no agent registered for specialist type, coordination will not await it");
            }
        }

        let coordination = Coordination {
            id: coordination_id.clone(),
            task_id,
            user_message,
            conversation_id,
            specialist_types,
            specialist_ids,
            responses: HashMap::new(),
            status: CoordinationStatus::InProgress,
            started_at: Timestamp::now(),
            completed_at: None,
            requester_token,
            final_content: None,
        };

        self.coordinations.insert(
            coordination_id,
            CoordinationGuard {
                state: Arc::new(Mutex::new(coordination)),
                completed: Arc::new(AtomicBool::new(false)),
            },
        );

        Ok(Some(
            Message::builder(
                self.core.id().clone(),
                MessageType::Response,
                MessageContent::try_new("coordination started").expect("non-empty literal"),
            )
            .to(AgentId::try_new(AgentId::ORCHESTRATOR).expect("reserved id is valid"))
            .priority(Priority::Low)
            .acknowledged()
            .build(),
        ))
    }

    #[instrument(skip(self, message))]
    async fn record_response(&self, message: Message) -> Result<Option<Message>, CoordinatorError> {
        let Some(coordination_id_str) = message.coordination_id() else {
            return Ok(None);
        };
        let coordination_id = CoordinationId::try_new(coordination_id_str.to_string())
            .map_err(|_| CoordinatorError::CoordinationNotFound(CoordinationId::try_new("unknown").unwrap()))?;

        let Some(guard) = self.coordinations.get(&coordination_id).map(|entry| entry.value().clone()) else {
            return Err(CoordinatorError::CoordinationNotFound(coordination_id));
        };

        let is_complete = {
            let mut coordination = guard.state.lock().await;
            if coordination.specialist_ids.iter().any(|id| id == &message.from) {
                coordination
                    .responses
                    .insert(message.from.as_ref().to_string(), message.content.as_ref().to_string());
            } else {
                warn!(from = %message.from, "ignoring coordination response from a non-specialist sender");
            }

            let expected: HashSet<&str> = coordination.specialist_ids.iter().map(AgentId::as_ref).collect();
            let actual: HashSet<&str> = coordination.responses.keys().map(String::as_str).collect();
            !expected.is_empty() && actual == expected
        };

        if !is_complete {
            return Ok(Some(
                Message::builder(
                    self.core.id().clone(),
                    MessageType::Response,
                    MessageContent::try_new("response recorded, awaiting remaining specialists")
                        .expect("non-empty literal"),
                )
                .to(AgentId::try_new(AgentId::ORCHESTRATOR).expect("reserved id is valid"))
                .context_entry(context_keys::COORDINATION_ID, serde_json::json!(coordination_id.to_string()))
                .acknowledged()
                .build(),
            ));
        }

        if guard.completed.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        self.finalize(coordination_id, guard).await?;
        Ok(None)
    }

    #[instrument(skip(self, guard))]
    async fn finalize(&self, coordination_id: CoordinationId, guard: CoordinationGuard) -> Result<(), CoordinatorError> {
        let orchestrator = self.orchestrator().ok_or(OrchestratorError::NotRunning)?;

        let (prompt, requester_token, task_id, specialist_responses) = {
            let mut coordination = guard.state.lock().await;
            coordination.status = CoordinationStatus::Completed;
            coordination.completed_at = Some(Timestamp::now());

            let mut prompt = format!("User asked: {}\n\nSpecialist input:\n", coordination.user_message);
            for specialist_id in &coordination.specialist_ids {
                if let Some(response) = coordination.responses.get(specialist_id.as_ref()) {
                    prompt.push_str(&format!("- {}: {response}\n", specialist_id.as_ref()));
                }
            }

            (
                prompt,
                coordination.requester_token.clone(),
                coordination.task_id,
                coordination.responses.clone(),
            )
        };

        let synthesized = self
            .llm
            .query(Duration::from_secs(30), &prompt)
            .await
            .map_err(|e| CoordinatorError::LlmFailure(e.to_string()))?;

        {
            let mut coordination = guard.state.lock().await;
            coordination.final_content = Some(synthesized.clone());
        }

        let mut task = orchestrator.get_task_status(task_id).await?;
        let mut output = HashMap::new();
        output.insert("synthesized".to_string(), serde_json::json!(synthesized));
        output.insert("specialist_responses".to_string(), serde_json::json!(specialist_responses));
        task.complete(output);
        orchestrator.update_task(task).await;

        self.coordinations.remove(&coordination_id);

        let final_reply = Message::builder(
            self.core.id().clone(),
            MessageType::Response,
            MessageContent::try_new(synthesized).unwrap_or_else(|_| {
                MessageContent::try_new("the specialists did not return any content").expect("non-empty literal")
            }),
        )
        .to(requester_token.as_agent_id())
        .context_entry(context_keys::COORDINATION_ID, serde_json::json!(coordination_id.to_string()))
        .context_entry(context_keys::TASK_ID, serde_json::json!(task_id.to_string()))
        .final_response()
        .build();

        orchestrator
            .route_message(final_reply)
            .await
            .map_err(CoordinatorError::from)?;

        info!(%coordination_id, "coordination finalized");
        Ok(())
    }
}

fn parse_task_id(raw: &str) -> Option<TaskId> {
    uuid::Uuid::parse_str(raw).ok().and_then(|id| TaskId::try_new(id).ok())
}

fn is_unsolicited_help_reply(message: &Message) -> bool {
    if message.message_type != MessageType::Response {
        return false;
    }
    let lower = message.content.as_ref().to_lowercase();
    GENERIC_HELP_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

#[async_trait]
impl Agent for CoordinatorAgent {
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
        let task_description = message.task_id().map(|id| format!("task {id}"));
        with_busy_bracket(&self.core, task_description, || self.route_incoming(message))
            .await
            .map_err(|e| match e {
                CoordinatorError::Orchestrator(inner) => inner,
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
    use crate::config::RuntimeConfig;
    use crate::domain_types::MessageContent as MC;
    use crate::llm::StubLlmProvider;
    use crate::memory_store::in_memory::InMemoryMemoryStore;

    fn agent_id(s: &str) -> AgentId {
        AgentId::try_new(s).unwrap()
    }

    #[tokio::test]
    async fn unsolicited_help_reply_is_dropped() {
        let orchestrator = Orchestrator::new(RuntimeConfig::testing(), Arc::new(InMemoryMemoryStore::new()));
        let coordinator = CoordinatorAgent::new(
            Arc::downgrade(&orchestrator),
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(StubLlmProvider::new("unused")),
        );

        let message = Message::builder(agent_id("research"), MessageType::Response, MC::try_new("would you like to: continue?").unwrap())
            .to(agent_id("coordinator"))
            .build();

        let reply = coordinator.handle_message(message).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn record_response_for_unknown_coordination_fails() {
        let orchestrator = Orchestrator::new(RuntimeConfig::testing(), Arc::new(InMemoryMemoryStore::new()));
        let coordinator = CoordinatorAgent::new(
            Arc::downgrade(&orchestrator),
            Arc::new(InMemoryMemoryStore::new()),
            Arc::new(StubLlmProvider::new("unused")),
        );

        let message = Message::builder(agent_id("research"), MessageType::Response, MC::try_new("an answer").unwrap())
            .to(agent_id("coordinator"))
            .context_entry(context_keys::COORDINATION_ID, serde_json::json!("coord_does_not_exist"))
            .build();

        let result = coordinator.handle_message(message).await;
        assert!(result.is_err());
    }

    #[test]
    fn coordination_id_is_stable_across_restarts() {
        let task_id = TaskId::generate();
        let a = CoordinationId::for_task(task_id);
        let b = CoordinationId::for_task(task_id);
        assert_eq!(a, b);
    }
}
