//! Property-based checks of two cross-cutting invariants: the coordinator's response keys always
//! equal the set of specialists it actually consulted, and the message queue rejects sends exactly
//! at capacity and nowhere else.

mod common;

use agentbus::config::RuntimeConfig;
use agentbus::conversation::ConversationAgent;
use agentbus::coordinator::CoordinatorAgent;
use agentbus::domain_types::{
    AgentId, EventQueueCapacity, MessageContent, QueueCapacity, RecentHistoryWindow, ResponseToken, TaskId,
};
use agentbus::error::OrchestratorError;
use agentbus::llm::StaticEchoLlmProvider;
use agentbus::memory_store::in_memory::InMemoryMemoryStore;
use agentbus::message::{context_keys, Message, MessageType};
use agentbus::orchestrator::Orchestrator;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const CATEGORIES: &[(&str, &str)] = &[
    ("research", "research"),
    ("task", "remind me"),
    ("project", "project plan"),
    ("scheduling", "schedule"),
];

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn coordination_response_keys_equal_specialist_ids(specialist_count in 1usize..=4) {
        let runtime = current_thread_runtime();
        runtime.block_on(async move {
            let memory_store = Arc::new(InMemoryMemoryStore::new());
            let orchestrator = Orchestrator::new(RuntimeConfig::testing(), memory_store.clone());
            let llm = Arc::new(StaticEchoLlmProvider);

            let conversation = Arc::new(ConversationAgent::new(
                Arc::downgrade(&orchestrator),
                memory_store.clone(),
                llm.clone(),
                RecentHistoryWindow::default(),
            ));
            let coordinator = Arc::new(CoordinatorAgent::new(Arc::downgrade(&orchestrator), memory_store.clone(), llm));
            orchestrator.register_agent(conversation).await.unwrap();
            orchestrator.register_agent(coordinator).await.unwrap();

            let mut expected_ids = HashSet::new();
            let mut phrases = Vec::new();
            for (category, phrase) in CATEGORIES.iter().take(specialist_count) {
                let agent_id = format!("{category}_agent");
                let specialist = Arc::new(common::EchoSpecialist::new(&agent_id, category, "ECHO:"));
                orchestrator.register_agent(specialist).await.unwrap();
                expected_ids.insert(agent_id);
                phrases.push(*phrase);
            }

            let (handler, mut rx) = common::collecting_handler();
            let token = ResponseToken::new_for_user("prop-user");
            orchestrator.register_user_response_handler(token.clone(), handler).await;

            let content = phrases.join(", ");
            let request = Message::builder(token.as_agent_id(), MessageType::Request, MessageContent::try_new(content).unwrap())
                .to(AgentId::try_new("conversation").unwrap())
                .context_entry(context_keys::USER_ID, serde_json::json!("prop-user"))
                .build();
            orchestrator.route_message(request).await.unwrap();

            let mut final_reply = None;
            for _ in 0..2 {
                let message = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
                if message.is_final_response() {
                    final_reply = Some(message);
                }
            }
            let final_reply = final_reply.expect("exactly one final reply is delivered");

            let task_id = final_reply.task_id().expect("final reply carries the owning task id");
            let task_id = TaskId::try_new(uuid::Uuid::parse_str(task_id).unwrap()).unwrap();
            let task = orchestrator.get_task_status(task_id).await.unwrap();

            let specialist_responses: std::collections::HashMap<String, String> =
                serde_json::from_value(task.output.get("specialist_responses").cloned().expect("specialist_responses present")).unwrap();
            let actual_ids: HashSet<String> = specialist_responses.keys().cloned().collect();

            prop_assert_eq!(actual_ids, expected_ids);
            Ok(())
        })?;
    }

    #[test]
    fn message_queue_rejects_exactly_at_capacity(capacity in 1usize..=4) {
        let runtime = current_thread_runtime();
        runtime.block_on(async move {
            let memory_store = Arc::new(InMemoryMemoryStore::new());
            let config = RuntimeConfig::testing()
                .to_builder()
                .message_queue_capacity(QueueCapacity::try_new(capacity).unwrap())
                .event_queue_capacity(EventQueueCapacity::try_new(capacity).unwrap())
                .build()
                .unwrap();
            let orchestrator = Orchestrator::new(config, memory_store);
            orchestrator.start(Duration::from_secs(5)).await.unwrap();

            let event = || {
                Message::builder(AgentId::try_new("sender").unwrap(), MessageType::Event, MessageContent::try_new("payload").unwrap())
                    .to(AgentId::try_new("nobody").unwrap())
                    .build()
            };

            for _ in 0..capacity {
                orchestrator.route_message(event()).await.unwrap();
            }
            let overflow = orchestrator.route_message(event()).await;
            prop_assert!(matches!(overflow, Err(OrchestratorError::QueueFull)));

            tokio::time::sleep(Duration::from_millis(100)).await;
            orchestrator.route_message(event()).await.unwrap();

            orchestrator.stop(Duration::from_secs(5)).await.unwrap();
            Ok(())
        })?;
    }
}
