//! The orchestrator: a typed in-process message bus plus task lifecycle.
//!
//! Owns the agent registry, the bounded message queue, the task map, and the user-response
//! handler registry. Agents never hold a strong reference back to the orchestrator — they are
//! invoked through `Arc<dyn Agent>` held here, and any back-reference an agent needs (to route a
//! reply, look up a sibling agent) is a `Weak<Orchestrator>`, so the orchestrator remains the
//! sole owner of the registry it manages.

pub mod health;
pub mod loop_prevention;

use crate::agent::{Agent, AgentState};
use crate::config::RuntimeConfig;
use crate::domain_types::{AgentId, ResponseToken, TaskId, Timestamp, Workload};
use crate::error::OrchestratorError;
use crate::memory_store::MemoryStore;
use crate::message::{context_keys, Message, MessageType};
use crate::task::{Task, TaskIndex, TaskStatus};
use dashmap::DashMap;
use loop_prevention::HopTracker;
pub use health::{SystemHealth, SystemStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

type UserResponseHandler = dyn Fn(Message) + Send + Sync;

const ORPHANED_RESPONSE_PREFIX: &str = "orchestrator:orphaned_response:";
const HEALTH_SNAPSHOT_KEY: &str = "orchestrator:health_snapshot";

/// Record persisted at `orchestrator:orphaned_response:<token>`, matching the schema in §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct OrphanedResponseRecord {
    response_key: String,
    content: String,
    timestamp: Timestamp,
    from_agent: String,
}

/// Process-local message bus, agent registry, and task lifecycle manager.
pub struct Orchestrator {
    config: RuntimeConfig,
    memory_store: Arc<dyn MemoryStore>,
    agents: DashMap<AgentId, Arc<dyn Agent>>,
    agents_by_type: DashMap<String, Vec<AgentId>>,
    tasks: DashMap<TaskId, Task>,
    handlers: RwLock<HashMap<ResponseToken, Arc<UserResponseHandler>>>,
    hops: HopTracker,
    message_tx: mpsc::Sender<Message>,
    message_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    running: AtomicBool,
    started_at: RwLock<Option<Timestamp>>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl Orchestrator {
    /// Builds a new orchestrator around `config` and the given memory store, not yet running.
    #[must_use]
    pub fn new(config: RuntimeConfig, memory_store: Arc<dyn MemoryStore>) -> Arc<Self> {
        let (message_tx, message_rx) = mpsc::channel(config.message_queue_capacity.into_inner());
        Arc::new(Self {
            config,
            memory_store,
            agents: DashMap::new(),
            agents_by_type: DashMap::new(),
            tasks: DashMap::new(),
            handlers: RwLock::new(HashMap::new()),
            hops: HopTracker::new(),
            message_tx,
            message_rx: Mutex::new(Some(message_rx)),
            running: AtomicBool::new(false),
            started_at: RwLock::new(None),
            loop_handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(Notify::new()),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ---- Agent registry -------------------------------------------------

    /// Registers a new agent, failing if one with the same id already exists.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AlreadyRegistered`] on a duplicate id.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id()))]
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<(), OrchestratorError> {
        let id = agent.id().clone();
        if self.agents.contains_key(&id) {
            return Err(OrchestratorError::AlreadyRegistered(id));
        }
        let agent_type = agent.agent_type().to_string();
        self.agents.insert(id.clone(), agent);
        self.agents_by_type.entry(agent_type).or_default().push(id.clone());

        let record = serde_json::json!({ "agent_id": id.as_ref(), "registered_at": Timestamp::now().to_string() });
        if let Err(e) = self.memory_store.store(&format!("orchestrator:agent_registration:{id}"), record).await {
            warn!(error = %e, "failed to persist agent registration event");
        }

        info!(%id, "agent registered");
        Ok(())
    }

    /// Stops the agent under a bounded deadline, then removes it from both indices.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if no such agent is registered, or
    /// [`OrchestratorError::LifecycleTimeout`] if `stop` does not complete in time.
    #[instrument(skip(self))]
    pub async fn unregister_agent(&self, id: &AgentId) -> Result<(), OrchestratorError> {
        let Some((_, agent)) = self.agents.remove(id) else {
            return Err(OrchestratorError::NotFound(format!("agent {id}")));
        };
        if let Some(mut bucket) = self.agents_by_type.get_mut(agent.agent_type()) {
            bucket.retain(|existing| existing != id);
        }

        let deadline = Duration::from_millis(self.config.agent_stop_deadline_ms.into_inner());
        match tokio::time::timeout(deadline, agent.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%id, error = %e, "agent reported an error while stopping"),
            Err(_) => return Err(OrchestratorError::LifecycleTimeout(format!("stopping agent {id}"))),
        }
        info!(%id, "agent unregistered");
        Ok(())
    }

    #[must_use]
    pub fn get_agent(&self, id: &AgentId) -> Option<Arc<dyn Agent>> {
        self.agents.get(id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn list_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.agents.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Agents registered under `agent_type`, in registration order — the basis for the
    /// coordinator's deterministic first-match specialist selection.
    #[must_use]
    pub fn find_agents_by_type(&self, agent_type: &str) -> Vec<Arc<dyn Agent>> {
        let Some(ids) = self.agents_by_type.get(agent_type) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get_agent(id)).collect()
    }

    // ---- Routing ----------------------------------------------------------

    /// Persists `message`, then enqueues it for asynchronous dispatch when running, or dispatches
    /// it synchronously otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::QueueFull`] when the bounded queue has no remaining capacity.
    #[instrument(skip(self, message), fields(from = %message.from, to = ?message.to))]
    pub async fn route_message(self: &Arc<Self>, message: Message) -> Result<(), OrchestratorError> {
        self.persist_message(&message).await;

        if !self.is_running() {
            self.dispatch_message(message).await;
            return Ok(());
        }

        self.message_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OrchestratorError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => OrchestratorError::NotRunning,
        })
    }

    /// Expands recipients to every registered agent and routes as [`Self::route_message`].
    ///
    /// # Errors
    ///
    /// See [`Self::route_message`].
    pub async fn broadcast_message(self: &Arc<Self>, mut message: Message) -> Result<(), OrchestratorError> {
        message.to = self.agents.iter().map(|entry| entry.key().clone()).collect();
        self.route_message(message).await
    }

    async fn persist_message(&self, message: &Message) {
        let key = format!("orchestrator:message:{}", message.id);
        if let Err(e) = self.memory_store.store(&key, serde_json::json!(message)).await {
            warn!(error = %e, "failed to persist routed message");
        }
    }

    async fn dispatch_message(self: &Arc<Self>, message: Message) {
        for recipient in message.to.clone() {
            let this = Arc::clone(self);
            let msg = message.clone();
            tokio::spawn(async move {
                this.dispatch_to_recipient(msg, recipient).await;
            });
        }
    }

    #[instrument(skip(self, message), fields(%recipient))]
    async fn dispatch_to_recipient(self: Arc<Self>, message: Message, recipient: AgentId) {
        if recipient.is_user_response_token() {
            match ResponseToken::try_new(recipient.as_ref().to_string()) {
                Ok(token) => self.dispatch_user_response(token, message).await,
                Err(_) => error!(%recipient, "malformed user-response token"),
            }
            return;
        }

        if recipient.is_orchestrator() {
            self.handle_internal_message(message).await;
            return;
        }

        let Some(agent) = self.get_agent(&recipient) else {
            warn!(%recipient, "no registered agent for recipient, dropping message");
            return;
        };

        let original_sender = message.from.clone();
        let reply = match agent.handle_message(message).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(agent_id = %recipient, error = %e, "agent failed to handle message");
                return;
            }
        };

        let Some(reply) = reply else { return };

        self.hops.record_hop(&original_sender, &recipient);

        if !loop_prevention::should_route(&reply, &original_sender, &self.hops) {
            debug!(from = %reply.from, "loop-prevention policy blocked reply");
            return;
        }

        if let Err(e) = self.route_message(reply).await {
            warn!(error = %e, "failed to re-route agent reply");
        }
    }

    /// Handles a message addressed to the reserved `orchestrator` recipient. Never routes
    /// elsewhere: a coordination-status `Response` is recorded, everything else is observed only.
    async fn handle_internal_message(&self, message: Message) {
        match message.message_type {
            MessageType::Response if message.coordination_id().is_some() => {
                if let Some(coordination_id) = message.coordination_id() {
                    let key = format!("orchestrator:coordination_status:{coordination_id}");
                    let record = serde_json::json!({
                        "coordination_id": coordination_id,
                        "from": message.from.as_ref(),
                        "received_at": Timestamp::now().to_string(),
                    });
                    if let Err(e) = self.memory_store.store(&key, record).await {
                        warn!(error = %e, "failed to persist coordination status");
                    }
                }
                trace!("internal coordination-status response recorded");
            }
            MessageType::Request => trace!(from = %message.from, "internal diagnostic request received"),
            other => trace!(message_type = ?other, "internal message observed, no action taken"),
        }
    }

    // ---- User-response dispatch --------------------------------------------

    #[instrument(skip(self, message), fields(%token))]
    async fn dispatch_user_response(&self, token: ResponseToken, message: Message) {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&token).cloned()
        };

        let Some(handler) = handler else {
            self.store_orphaned_response(&token, &message).await;
            return;
        };

        tokio::spawn(async move {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(message)));
            if let Err(panic) = outcome {
                error!(?panic, "user-response handler panicked");
            }
        });
    }

    async fn store_orphaned_response(&self, token: &ResponseToken, message: &Message) {
        let record = OrphanedResponseRecord {
            response_key: token.as_ref().to_string(),
            content: message.content.as_ref().to_string(),
            timestamp: Timestamp::now(),
            from_agent: message.from.as_ref().to_string(),
        };
        let key = format!("{ORPHANED_RESPONSE_PREFIX}{token}");
        let ttl = Duration::from_secs(self.config.orphan_response_ttl.into_inner());
        match self.memory_store.store_with_ttl(&key, serde_json::json!(record), ttl).await {
            Ok(()) => warn!(%token, "no registered handler, response stored as orphan"),
            Err(e) => error!(error = %e, "failed to store orphaned response"),
        }
    }

    /// Registers a callback invoked exactly once when the final reply addressed to `token`
    /// arrives. Logs (but allows) replacement of an existing registration.
    pub async fn register_user_response_handler(&self, token: ResponseToken, handler: Arc<UserResponseHandler>) {
        let mut handlers = self.handlers.write().await;
        if handlers.insert(token.clone(), handler).is_some() {
            warn!(%token, "replacing existing user-response handler registration");
        }
    }

    pub async fn unregister_user_response_handler(&self, token: &ResponseToken) {
        self.handlers.write().await.remove(token);
    }

    /// Retrieves a stored orphaned payload, deleting it on success so a second call reports
    /// not-found.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if no orphaned response is stored under `token`.
    #[instrument(skip(self))]
    pub async fn get_orphaned_response(&self, token: &ResponseToken) -> Result<serde_json::Value, OrchestratorError> {
        let key = format!("{ORPHANED_RESPONSE_PREFIX}{token}");
        let value = self
            .memory_store
            .get(&key)
            .await
            .map_err(|e| OrchestratorError::Storage(e.to_string()))?
            .ok_or_else(|| OrchestratorError::NotFound(format!("orphaned response {token}")))?;
        self.memory_store
            .delete(&key)
            .await
            .map_err(|e| OrchestratorError::Storage(e.to_string()))?;
        Ok(value)
    }

    // ---- Tasks --------------------------------------------------------------

    /// Resolves an assignee if none is set (lowest-workload agent whose capabilities include the
    /// task type), transitions the task to `Assigned`, persists it, and routes a `Request` to the
    /// chosen agent carrying `task_id` in context.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoSuitableAgent`] if no capable agent is registered.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn assign_task(self: &Arc<Self>, mut task: Task) -> Result<AgentId, OrchestratorError> {
        let assignee = match task.assignee.clone() {
            Some(existing) => existing,
            None => self
                .select_assignee(&task.task_type)
                .await
                .ok_or_else(|| OrchestratorError::NoSuitableAgent(task.task_type.clone()))?,
        };

        task.assign(assignee.clone());
        let task_id = task.id;
        self.update_task(task.clone()).await;

        let request = Message::builder(
            AgentId::try_new(AgentId::ORCHESTRATOR).expect("reserved orchestrator id is valid"),
            MessageType::Request,
            crate::domain_types::MessageContent::try_new(task.description.clone())
                .unwrap_or_else(|_| crate::domain_types::MessageContent::try_new("task assignment").expect("non-empty literal")),
        )
        .to(assignee.clone())
        .context_entry(context_keys::TASK_ID, serde_json::json!(task_id.to_string()))
        .build();

        if let Err(e) = self.route_message(request).await {
            warn!(error = %e, "failed to route task assignment message");
        }

        info!(task_id = %task_id, assignee = %assignee, "task assigned");
        Ok(assignee)
    }

    async fn select_assignee(&self, task_type: &str) -> Option<AgentId> {
        let candidates: Vec<Arc<dyn Agent>> = self
            .agents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|agent| agent.capabilities().iter().any(|cap| cap == task_type))
            .collect();

        let mut best: Option<(AgentId, Workload)> = None;
        for agent in candidates {
            let snapshot = agent.state().await;
            if snapshot.status == AgentState::Offline {
                continue;
            }
            let is_better = match &best {
                None => true,
                Some((_, workload)) => snapshot.workload < *workload,
            };
            if is_better {
                best = Some((agent.id().clone(), snapshot.workload));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Looks up a task's current status: in-memory first, falling through to the memory store.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if no task exists with this id, or
    /// [`OrchestratorError::DecodeError`] if a persisted record fails to deserialize.
    pub async fn get_task_status(&self, task_id: TaskId) -> Result<Task, OrchestratorError> {
        if let Some(task) = self.tasks.get(&task_id) {
            return Ok(task.clone());
        }
        let key = format!("orchestrator:task:{task_id}");
        let value = self
            .memory_store
            .get(&key)
            .await
            .map_err(|e| OrchestratorError::Storage(e.to_string()))?
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {task_id}")))?;
        serde_json::from_value(value).map_err(|e| OrchestratorError::DecodeError {
            record: "task".to_string(),
            reason: e.to_string(),
        })
    }

    /// Records a task's current state (insert or transition), persisting it and the status index.
    /// Used directly by the task tool and the coordinator's finalize step.
    pub async fn update_task(&self, task: Task) {
        let task_id = task.id;
        let status = task.status;
        self.tasks.insert(task_id, task.clone());
        self.persist_task(&task).await;
        self.record_task_transition(task_id, status).await;
    }

    /// Current snapshot of the status->task-ids secondary index.
    pub async fn task_index_snapshot(&self) -> TaskIndex {
        self.load_task_index().await
    }

    async fn persist_task(&self, task: &Task) {
        let key = format!("orchestrator:task:{}", task.id);
        if let Err(e) = self.memory_store.store(&key, serde_json::json!(task)).await {
            warn!(error = %e, "failed to persist task");
        }
    }

    async fn record_task_transition(&self, task_id: TaskId, status: TaskStatus) {
        let mut index = self.load_task_index().await;
        index.record_transition(task_id, status);
        if let Err(e) = self.memory_store.store(TaskIndex::STORE_KEY, serde_json::json!(index)).await {
            warn!(error = %e, "failed to persist task index");
        }
    }

    async fn load_task_index(&self) -> TaskIndex {
        match self.memory_store.get(TaskIndex::STORE_KEY).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            _ => TaskIndex::default(),
        }
    }

    // ---- Health ---------------------------------------------------------------

    /// Composite health snapshot: agent/task counts, queue depth, uptime, and derived status.
    #[instrument(skip(self))]
    pub async fn system_health(&self) -> SystemHealth {
        let agent_count = self.agents.len();
        let mut active_count = 0usize;
        let mut error_count = 0usize;
        for entry in &self.agents {
            match entry.value().state().await.status {
                AgentState::Error => error_count += 1,
                AgentState::Offline => {}
                AgentState::Idle | AgentState::Busy => active_count += 1,
            }
        }

        let mut task_counts = HashMap::new();
        for entry in &self.tasks {
            *task_counts.entry(format!("{:?}", entry.value().status)).or_insert(0usize) += 1;
        }

        let queue_capacity = self.config.message_queue_capacity.into_inner();
        let queue_depth = queue_capacity.saturating_sub(self.message_tx.capacity());

        let uptime_ms = match *self.started_at.read().await {
            Some(started) => u64::try_from(Timestamp::now().elapsed_ms_since(started)).unwrap_or(0),
            None => 0,
        };

        let status = health::derive_status(self.is_running(), agent_count, error_count, queue_depth, queue_capacity);

        SystemHealth {
            agent_count,
            active_count,
            error_count,
            task_counts,
            queue_depth,
            queue_capacity,
            uptime_ms,
            status,
        }
    }

    // ---- Lifecycle -----------------------------------------------------------

    /// Spawns the router, event-processor, and health-monitor loops.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::LifecycleTimeout`] if the loops cannot be spawned within
    /// `deadline`, or if `start` is called a second time after the receiver has already been
    /// consumed by a prior start/stop cycle.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>, deadline: Duration) -> Result<(), OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let receiver = self.message_rx.lock().await.take().ok_or_else(|| {
            OrchestratorError::LifecycleTimeout("router receiver already consumed".to_string())
        })?;

        let spawn = async {
            let mut handles = self.loop_handles.lock().await;
            handles.push(tokio::spawn({
                let this = Arc::clone(self);
                let shutdown = Arc::clone(&self.shutdown);
                async move { this.run_router_loop(receiver, shutdown).await }
            }));
            handles.push(tokio::spawn({
                let this = Arc::clone(self);
                let shutdown = Arc::clone(&self.shutdown);
                async move { this.run_event_processor_loop(shutdown).await }
            }));
            handles.push(tokio::spawn({
                let this = Arc::clone(self);
                let shutdown = Arc::clone(&self.shutdown);
                async move { this.run_health_monitor_loop(shutdown).await }
            }));
        };

        if tokio::time::timeout(deadline, spawn).await.is_err() {
            return Err(OrchestratorError::LifecycleTimeout("starting orchestrator loops".to_string()));
        }

        *self.started_at.write().await = Some(Timestamp::now());
        info!("orchestrator started");
        Ok(())
    }

    /// Signals the loops to stop and awaits their termination within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::LifecycleTimeout`] if the loops do not terminate in time.
    #[instrument(skip(self))]
    pub async fn stop(&self, deadline: Duration) -> Result<(), OrchestratorError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.notify_waiters();

        let handles = {
            let mut guard = self.loop_handles.lock().await;
            std::mem::take(&mut *guard)
        };

        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(deadline, join_all).await {
            Ok(()) => {
                info!("orchestrator stopped");
                Ok(())
            }
            Err(_) => Err(OrchestratorError::LifecycleTimeout("stopping orchestrator loops".to_string())),
        }
    }

    async fn run_router_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Message>, shutdown: Arc<Notify>) {
        info!("router loop started");
        loop {
            tokio::select! {
                maybe_message = rx.recv() => {
                    match maybe_message {
                        Some(message) => self.dispatch_message(message).await,
                        None => break,
                    }
                }
                () = shutdown.notified() => break,
            }
        }
        info!("router loop stopped");
    }

    async fn run_event_processor_loop(self: Arc<Self>, shutdown: Arc<Notify>) {
        info!("event processor loop started");
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = ticker.tick() => trace!("event processor tick"),
                () = shutdown.notified() => break,
            }
        }
        info!("event processor loop stopped");
    }

    async fn run_health_monitor_loop(self: Arc<Self>, shutdown: Arc<Notify>) {
        info!("health monitor loop started");
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let health = self.system_health().await;
                    if health.status == SystemStatus::Critical {
                        error!(?health, "system health critical");
                    } else {
                        trace!(?health, "health snapshot recorded");
                    }
                    let ttl = Duration::from_secs(self.config.health_snapshot_ttl.into_inner());
                    if let Err(e) = self
                        .memory_store
                        .store_with_ttl(HEALTH_SNAPSHOT_KEY, serde_json::json!(health), ttl)
                        .await
                    {
                        warn!(error = %e, "failed to persist health snapshot");
                    }
                }
                () = shutdown.notified() => break,
            }
        }
        info!("health monitor loop stopped");
    }
}
