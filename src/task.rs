//! Task records: mutable, single-writer work items tracked by the orchestrator.

use crate::domain_types::{AgentId, Priority, TaskId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a [`Task`]. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// True for the two terminal statuses; a terminal task never transitions again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work tracked by the orchestrator and assigned to an agent.
///
/// `output` is always a non-null, initially empty mapping: several code paths (notably the
/// coordinator's finalize step) write into it unconditionally and rely on it already existing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub description: String,
    pub priority: Priority,
    pub requester: AgentId,
    pub assignee: Option<AgentId>,
    pub status: TaskStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub input: HashMap<String, serde_json::Value>,
    pub output: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    /// Builds a new, unassigned task in `Pending` status with the load-bearing empty (but
    /// non-null) output mapping already present.
    #[must_use]
    pub fn new(
        task_type: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        requester: AgentId,
        input: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            task_type: task_type.into(),
            description: description.into(),
            priority,
            requester,
            assignee: None,
            status: TaskStatus::Pending,
            created_at: Timestamp::now(),
            started_at: None,
            completed_at: None,
            input,
            output: HashMap::new(),
            error: None,
        }
    }

    /// Transitions to `Assigned`, recording the assignee.
    pub fn assign(&mut self, assignee: AgentId) {
        self.assignee = Some(assignee);
        self.status = TaskStatus::Assigned;
    }

    /// Transitions to `InProgress`, stamping the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Timestamp::now());
    }

    /// Transitions to the terminal `Completed` status, stamping completion time and storing
    /// `output` (never overwriting to an empty/null value — callers pass the final mapping).
    pub fn complete(&mut self, output: HashMap<String, serde_json::Value>) {
        self.output = output;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Timestamp::now());
    }

    /// Transitions to the terminal `Failed` status, capturing the error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Timestamp::now());
    }
}

/// Secondary index mapping task status to the ids of tasks currently in that status, maintained
/// by the task tool on every transition and stored in the memory store under a fixed key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskIndex {
    pub by_status: HashMap<String, Vec<TaskId>>,
}

impl TaskIndex {
    /// Fixed memory-store key under which the index is persisted.
    pub const STORE_KEY: &'static str = "task_index";

    /// Moves `task_id` into the bucket for `new_status`, removing it from any bucket it was
    /// previously recorded under.
    pub fn record_transition(&mut self, task_id: TaskId, new_status: TaskStatus) {
        for bucket in self.by_status.values_mut() {
            bucket.retain(|id| *id != task_id);
        }
        self.by_status
            .entry(status_key(new_status))
            .or_default()
            .push(task_id);
    }

    /// Lists task ids currently recorded under `status`.
    #[must_use]
    pub fn list(&self, status: TaskStatus) -> &[TaskId] {
        self.by_status
            .get(&status_key(status))
            .map_or(&[], Vec::as_slice)
    }
}

fn status_key(status: TaskStatus) -> String {
    format!("{status:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requester() -> AgentId {
        AgentId::try_new("conversation").unwrap()
    }

    #[test]
    fn new_task_has_non_null_empty_output() {
        let task = Task::new("user_request", "desc", Priority::Medium, requester(), HashMap::new());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.output.is_empty());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn complete_stamps_terminal_state() {
        let mut task = Task::new("user_request", "desc", Priority::Medium, requester(), HashMap::new());
        let mut output = HashMap::new();
        output.insert("answer".to_string(), serde_json::json!("42"));
        task.complete(output);
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.status.is_terminal());
        assert!(task.completed_at.is_some());
        assert!(!task.output.is_empty());
    }

    #[test]
    fn task_index_tracks_single_current_bucket_per_task() {
        let mut index = TaskIndex::default();
        let id = TaskId::generate();
        index.record_transition(id, TaskStatus::Pending);
        index.record_transition(id, TaskStatus::Assigned);

        assert!(index.list(TaskStatus::Pending).is_empty());
        assert_eq!(index.list(TaskStatus::Assigned), &[id]);
    }
}
