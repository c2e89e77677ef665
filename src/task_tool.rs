//! The task tool: a thin command surface over the orchestrator's task lifecycle, used by
//! specialist agents (and the CLI) to create, assign, complete, and inspect tasks without
//! reaching into the orchestrator's internals directly.

use crate::domain_types::{AgentId, Priority, TaskId};
use crate::error::{OrchestratorError, TaskToolError};
use crate::orchestrator::Orchestrator;
use crate::task::{Task, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const TASK_TOOL_REQUESTER: &str = "task_tool";

/// A parsed task-tool command. Mirrors the same variants a structured (non-textual) caller would
/// produce, so [`TaskCommand::parse`] and a direct struct literal are interchangeable inputs to
/// [`TaskTool::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    Create {
        task_type: String,
        description: String,
        priority: Priority,
    },
    Assign {
        task_id: TaskId,
        assignee: AgentId,
    },
    Complete {
        task_id: TaskId,
        output: String,
    },
    Status {
        task_id: TaskId,
    },
    List {
        status: Option<TaskStatus>,
    },
}

impl TaskCommand {
    /// Parses a whitespace-separated command line, e.g. `"create research \"find X\" high"` or
    /// `"status <task-id>"`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskToolError::UnrecognizedCommand`] for an unknown verb, or
    /// [`TaskToolError::InvalidArgument`] when a required argument is missing or malformed.
    pub fn parse(input: &str) -> Result<Self, TaskToolError> {
        let mut parts = input.split_whitespace();
        let verb = parts.next().ok_or_else(|| TaskToolError::UnrecognizedCommand(input.to_string()))?;

        match verb {
            "create" => {
                let task_type = parts
                    .next()
                    .ok_or_else(|| TaskToolError::InvalidArgument("create requires a task type".to_string()))?
                    .to_string();
                let rest: Vec<&str> = parts.collect();
                if rest.is_empty() {
                    return Err(TaskToolError::InvalidArgument("create requires a description".to_string()));
                }
                let (priority, description_parts) = match rest.last() {
                    Some(&"low") => (Priority::Low, &rest[..rest.len() - 1]),
                    Some(&"medium") => (Priority::Medium, &rest[..rest.len() - 1]),
                    Some(&"high") => (Priority::High, &rest[..rest.len() - 1]),
                    Some(&"critical") => (Priority::Critical, &rest[..rest.len() - 1]),
                    _ => (Priority::default(), &rest[..]),
                };
                if description_parts.is_empty() {
                    return Err(TaskToolError::InvalidArgument("create requires a description".to_string()));
                }
                Ok(Self::Create {
                    task_type,
                    description: description_parts.join(" "),
                    priority,
                })
            }
            "assign" => {
                let task_id = parse_task_id(parts.next())?;
                let assignee = parts
                    .next()
                    .ok_or_else(|| TaskToolError::InvalidArgument("assign requires an assignee".to_string()))
                    .and_then(|s| AgentId::try_new(s.to_string()).map_err(|e| TaskToolError::InvalidArgument(e.to_string())))?;
                Ok(Self::Assign { task_id, assignee })
            }
            "complete" => {
                let task_id = parse_task_id(parts.next())?;
                let output: Vec<&str> = parts.collect();
                Ok(Self::Complete {
                    task_id,
                    output: output.join(" "),
                })
            }
            "status" => Ok(Self::Status {
                task_id: parse_task_id(parts.next())?,
            }),
            "list" => Ok(Self::List {
                status: parts.next().and_then(parse_status),
            }),
            other => Err(TaskToolError::UnrecognizedCommand(other.to_string())),
        }
    }
}

fn parse_task_id(raw: Option<&str>) -> Result<TaskId, TaskToolError> {
    let raw = raw.ok_or_else(|| TaskToolError::InvalidArgument("missing task id".to_string()))?;
    let uuid = uuid::Uuid::parse_str(raw).map_err(|e| TaskToolError::InvalidArgument(e.to_string()))?;
    TaskId::try_new(uuid).map_err(|e| TaskToolError::InvalidArgument(e.to_string()))
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw {
        "pending" => Some(TaskStatus::Pending),
        "assigned" => Some(TaskStatus::Assigned),
        "in_progress" => Some(TaskStatus::InProgress),
        "completed" => Some(TaskStatus::Completed),
        "failed" => Some(TaskStatus::Failed),
        "cancelled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

/// Result of executing a [`TaskCommand`].
#[derive(Debug, Clone)]
pub enum TaskCommandResult {
    Created(Task),
    Assigned(AgentId),
    Completed(Task),
    Status(Task),
    List(Vec<Task>),
}

/// Thin facade over [`Orchestrator`]'s task operations, exposed as a parseable command surface.
pub struct TaskTool {
    orchestrator: Arc<Orchestrator>,
}

impl TaskTool {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Executes a parsed command against the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`TaskToolError::TaskNotFound`] when a command references an unknown task, or
    /// propagates an [`OrchestratorError`] from the underlying call.
    pub async fn execute(&self, command: TaskCommand) -> Result<TaskCommandResult, TaskToolError> {
        match command {
            TaskCommand::Create { task_type, description, priority } => self.create(task_type, description, priority).await,
            TaskCommand::Assign { task_id, assignee } => self.assign(task_id, assignee).await,
            TaskCommand::Complete { task_id, output } => self.complete(task_id, output).await,
            TaskCommand::Status { task_id } => self.status(task_id).await,
            TaskCommand::List { status } => self.list(status).await,
        }
    }

    async fn create(&self, task_type: String, description: String, priority: Priority) -> Result<TaskCommandResult, TaskToolError> {
        let requester = AgentId::try_new(TASK_TOOL_REQUESTER).expect("reserved id is valid");
        let task = Task::new(task_type, description, priority, requester, HashMap::new());
        self.orchestrator.update_task(task.clone()).await;

        let orchestrator = Arc::clone(&self.orchestrator);
        let background_task = task.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.assign_task(background_task).await {
                warn!(error = %e, "background task assignment failed");
            }
        });

        Ok(TaskCommandResult::Created(task))
    }

    async fn assign(&self, task_id: TaskId, assignee: AgentId) -> Result<TaskCommandResult, TaskToolError> {
        let mut task = self.lookup(task_id).await?;
        task.assign(assignee.clone());
        self.orchestrator.update_task(task).await;
        Ok(TaskCommandResult::Assigned(assignee))
    }

    async fn complete(&self, task_id: TaskId, output: String) -> Result<TaskCommandResult, TaskToolError> {
        let mut task = self.lookup(task_id).await?;
        let mut output_map = HashMap::new();
        output_map.insert("result".to_string(), serde_json::json!(output));
        task.complete(output_map);
        self.orchestrator.update_task(task.clone()).await;
        Ok(TaskCommandResult::Completed(task))
    }

    async fn status(&self, task_id: TaskId) -> Result<TaskCommandResult, TaskToolError> {
        Ok(TaskCommandResult::Status(self.lookup(task_id).await?))
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<TaskCommandResult, TaskToolError> {
        let index = self.orchestrator.task_index_snapshot().await;
        let ids: Vec<TaskId> = match status {
            Some(status) => index.list(status).to_vec(),
            None => index.by_status.values().flatten().copied().collect(),
        };

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(task) = self.orchestrator.get_task_status(id).await {
                tasks.push(task);
            }
        }
        Ok(TaskCommandResult::List(tasks))
    }

    async fn lookup(&self, task_id: TaskId) -> Result<Task, TaskToolError> {
        self.orchestrator
            .get_task_status(task_id)
            .await
            .map_err(|e| match e {
                OrchestratorError::NotFound(_) => TaskToolError::TaskNotFound(task_id),
                other => TaskToolError::Orchestrator(other),
            })
    }
}
