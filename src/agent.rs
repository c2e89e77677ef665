//! Base agent lifecycle: the common contract every agent (conversation, coordinator, or
//! specialist) implements.
//!
//! Agents in this crate are long-lived and shared — looked up by id from the orchestrator's
//! registry and invoked concurrently — rather than consumed-and-transformed through a
//! compile-time state machine the way the donor's `Agent<Unloaded/Loaded/Running>` phantom type
//! models WASM module lifecycle. A shared, concurrently-invoked value can't be moved through
//! owned `Agent<State>` transitions, so state here is a runtime enum guarded by the agent's own
//! lock instead (see DESIGN.md).

use crate::domain_types::{AgentId, Workload};
use crate::error::OrchestratorError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Runtime status of an agent, written only by the agent itself under its own lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Idle,
    Busy,
    Error,
    Offline,
}

/// A snapshot of an agent's current status, read by the orchestrator for health and assignment
/// decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateSnapshot {
    pub status: AgentState,
    pub workload: Workload,
    pub current_task: Option<String>,
}

impl Default for AgentStateSnapshot {
    fn default() -> Self {
        Self {
            status: AgentState::Idle,
            workload: Workload::default(),
            current_task: None,
        }
    }
}

/// Common behavior every agent implements.
///
/// `handle_message` transitions the agent's own state to `Busy` at entry and back to the prior
/// (or `Idle`) state at exit, under the agent's own lock; implementations should route through
/// [`AgentCore::handle_message`] on a base struct rather than re-implement this bookkeeping.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier.
    fn id(&self) -> &AgentId;

    /// Human-readable display name.
    fn name(&self) -> &str;

    /// Type tag used for capability-based lookup (e.g. `"research"`, `"conversation"`).
    fn agent_type(&self) -> &str;

    /// Declared capabilities (task types this agent can be assigned).
    fn capabilities(&self) -> &[String];

    /// Current state snapshot.
    async fn state(&self) -> AgentStateSnapshot;

    /// Starts the agent (e.g. warms caches, subscribes to background work). Default is a no-op.
    async fn start(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    /// Stops the agent under the caller's responsibility to enforce a deadline. Default is a
    /// no-op.
    async fn stop(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    /// Handles an inbound message, optionally producing a reply to be considered for
    /// re-routing by the orchestrator's loop-prevention policy.
    async fn handle_message(&self, message: Message) -> Result<Option<Message>, OrchestratorError>;
}

/// Shared state bookkeeping every concrete agent embeds, providing the `Busy`/`Idle` transition
/// bracketing `handle_message` is required to perform.
#[derive(Debug)]
pub struct AgentCore {
    id: AgentId,
    name: String,
    agent_type: String,
    capabilities: Vec<String>,
    state: RwLock<AgentStateSnapshot>,
}

impl AgentCore {
    /// Builds the shared core for a concrete agent.
    #[must_use]
    pub fn new(id: AgentId, name: impl Into<String>, agent_type: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            agent_type: agent_type.into(),
            capabilities,
            state: RwLock::new(AgentStateSnapshot::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub async fn state(&self) -> AgentStateSnapshot {
        self.state.read().await.clone()
    }

    /// Marks the agent `Busy` with an optional task description; call at the start of
    /// `handle_message`.
    pub async fn enter_busy(&self, current_task: Option<String>) {
        let mut state = self.state.write().await;
        state.status = AgentState::Busy;
        state.current_task = current_task;
    }

    /// Marks the agent `Idle`; call at the end of `handle_message` regardless of outcome.
    pub async fn exit_to_idle(&self) {
        let mut state = self.state.write().await;
        state.status = AgentState::Idle;
        state.current_task = None;
    }

    /// Marks the agent `Error`, used when a handler panics or fails unrecoverably.
    pub async fn mark_error(&self) {
        let mut state = self.state.write().await;
        state.status = AgentState::Error;
    }

    pub async fn set_workload(&self, workload: Workload) {
        self.state.write().await.workload = workload;
    }
}

/// Runs `body` bracketed by the `Busy`/`Idle` (or `Error`) state transitions required of every
/// agent's `handle_message`, per the base agent lifecycle contract.
pub async fn with_busy_bracket<F, Fut, T, E>(core: &AgentCore, current_task: Option<String>, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    core.enter_busy(current_task).await;
    let result = body().await;
    if result.is_ok() {
        core.exit_to_idle().await;
    } else {
        core.mark_error().await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn busy_bracket_returns_to_idle_on_success() {
        let core = AgentCore::new(
            AgentId::try_new("a").unwrap(),
            "Agent A",
            "test",
            vec!["test".to_string()],
        );

        let result: Result<(), OrchestratorError> =
            with_busy_bracket(&core, Some("task".to_string()), || async { Ok(()) }).await;

        assert!(result.is_ok());
        assert_eq!(core.state().await.status, AgentState::Idle);
    }

    #[tokio::test]
    async fn busy_bracket_marks_error_on_failure() {
        let core = AgentCore::new(AgentId::try_new("a").unwrap(), "Agent A", "test", vec![]);

        let result: Result<(), OrchestratorError> =
            with_busy_bracket(&core, None, || async { Err(OrchestratorError::QueueFull) }).await;

        assert!(result.is_err());
        assert_eq!(core.state().await.status, AgentState::Error);
    }
}
