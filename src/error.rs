//! Error taxonomy for the orchestration runtime.
//!
//! Each bounded subsystem gets its own `thiserror`-derived enum rather than one catch-all type,
//! following the donor `message_router`'s split between `RouterError`/`DeliveryError`/
//! `ConversationError`/`RegistryError`.

use crate::domain_types::{AgentId, CoordinationId, TaskId};
use thiserror::Error;

/// Errors raised by the orchestrator's public entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No agent, task, or coordination exists with the given identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// An agent with this id is already registered.
    #[error("agent already registered: {0}")]
    AlreadyRegistered(AgentId),

    /// The bounded message (or event) queue has no remaining capacity.
    #[error("queue full")]
    QueueFull,

    /// No registered agent can service a task's type with acceptable workload.
    #[error("no suitable agent for task type: {0}")]
    NoSuitableAgent(String),

    /// A persisted record could not be deserialized.
    #[error("failed to decode {record}: {reason}")]
    DecodeError {
        /// Kind of record that failed to decode.
        record: String,
        /// Underlying decode failure.
        reason: String,
    },

    /// An agent's `handle_message` returned an error.
    #[error("agent {agent_id} failed to handle message: {reason}")]
    AgentHandlerFailure {
        /// The agent whose handler failed.
        agent_id: AgentId,
        /// The failure reason reported by the agent.
        reason: String,
    },

    /// The orchestrator is not running and the requested operation requires it to be.
    #[error("orchestrator is not running")]
    NotRunning,

    /// Start or stop failed to complete within the caller's deadline.
    #[error("lifecycle operation timed out: {0}")]
    LifecycleTimeout(String),

    /// The underlying memory store rejected an operation.
    #[error("memory store error: {0}")]
    Storage(String),
}

/// Errors raised by the coordinator agent's fan-out/fan-in protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The task referenced by an incoming request does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The coordination referenced by an incoming reply does not exist.
    #[error("coordination not found: {0}")]
    CoordinationNotFound(CoordinationId),

    /// The language model provider returned an error while synthesizing a reply.
    #[error("llm provider failure: {0}")]
    LlmFailure(String),

    /// Underlying orchestrator call failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Errors raised by the conversation agent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The language model provider returned an error while answering locally.
    #[error("llm provider failure: {0}")]
    LlmFailure(String),

    /// Underlying orchestrator call failed while delegating.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Errors raised by the task tool's command surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskToolError {
    /// The requested task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The command string could not be parsed into a known command.
    #[error("unrecognized command: {0}")]
    UnrecognizedCommand(String),

    /// A required command argument was missing or malformed.
    #[error("invalid command argument: {0}")]
    InvalidArgument(String),

    /// Underlying orchestrator call failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
