//! End-to-end scenarios exercising the conversation agent, coordinator, and orphaned-response
//! recovery path together, the way a real user request flows through the bus.

mod common;

use agentbus::config::RuntimeConfig;
use agentbus::conversation::{ConversationAgent, ConversationContext, ConversationRole};
use agentbus::coordinator::CoordinatorAgent;
use agentbus::domain_types::{AgentId, MessageContent, RecentHistoryWindow, ResponseToken, TaskId};
use agentbus::llm::{StaticEchoLlmProvider, StubLlmProvider};
use agentbus::memory_store::in_memory::InMemoryMemoryStore;
use agentbus::message::{context_keys, Message, MessageType};
use agentbus::orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn user_request(token: &ResponseToken, user_id: &str, content: &str, to: &str) -> Message {
    Message::builder(token.as_agent_id(), MessageType::Request, MessageContent::try_new(content).unwrap())
        .to(AgentId::try_new(to).unwrap())
        .context_entry(context_keys::USER_ID, serde_json::json!(user_id))
        .build()
}

#[tokio::test]
async fn direct_conversation_answers_locally_and_persists_transcript() {
    let memory_store = Arc::new(InMemoryMemoryStore::new());
    let orchestrator = Orchestrator::new(RuntimeConfig::testing(), memory_store.clone());
    let llm = Arc::new(StubLlmProvider::new("an assistant reply"));
    let conversation = Arc::new(ConversationAgent::new(
        Arc::downgrade(&orchestrator),
        memory_store.clone(),
        llm,
        RecentHistoryWindow::default(),
    ));
    orchestrator.register_agent(conversation).await.unwrap();

    let (handler, mut rx) = common::collecting_handler();
    let token = ResponseToken::new_for_user("u1");
    orchestrator.register_user_response_handler(token.clone(), handler).await;

    let request = user_request(&token, "u1", "Hi there", "conversation");
    orchestrator.route_message(request).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(reply.content.as_ref(), "an assistant reply");

    let stored = memory_store.get("conversation:conv_u1").await.unwrap().expect("conversation persisted");
    let context: ConversationContext = serde_json::from_value(stored).unwrap();
    let roles: Vec<ConversationRole> = context.turns.iter().map(|turn| turn.role).collect();
    assert_eq!(roles, vec![ConversationRole::System, ConversationRole::User, ConversationRole::Assistant]);
    assert_eq!(context.turns[1].content, "Hi there");
    assert_eq!(context.turns[2].content, "an assistant reply");
}

#[tokio::test]
async fn delegation_with_one_specialist_acks_then_delivers_a_synthesized_final_reply() {
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
    let research = Arc::new(common::EchoSpecialist::new("research_agent", "research", "RESEARCH:"));
    orchestrator.register_agent(conversation).await.unwrap();
    orchestrator.register_agent(coordinator).await.unwrap();
    orchestrator.register_agent(research).await.unwrap();

    let (handler, mut rx) = common::collecting_handler();
    let token = ResponseToken::new_for_user("u2");
    orchestrator.register_user_response_handler(token.clone(), handler).await;

    let request = user_request(&token, "u2", "Please research widgets.", "conversation");
    orchestrator.route_message(request).await.unwrap();

    let mut ack = None;
    let mut final_reply = None;
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        if message.is_final_response() {
            final_reply = Some(message);
        } else {
            ack = Some(message);
        }
    }

    let ack = ack.expect("an immediate acknowledgement is delivered");
    assert!(ack.is_acknowledged());
    let ack_content = ack.content.as_ref().to_lowercase();
    assert!(ack_content.contains("consulting") && ack_content.contains("specialists"));

    let final_reply = final_reply.expect("exactly one final reply is delivered");
    assert!(final_reply.content.as_ref().contains("RESEARCH:Please research widgets."));
}

#[tokio::test]
async fn two_specialists_join_before_the_task_completes_with_both_outputs() {
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
    let research = Arc::new(common::EchoSpecialist::new("research_agent", "research", "RESEARCH:"));
    let task_agent = Arc::new(common::EchoSpecialist::new("task_agent", "task", "TASK:"));
    orchestrator.register_agent(conversation).await.unwrap();
    orchestrator.register_agent(coordinator).await.unwrap();
    orchestrator.register_agent(research).await.unwrap();
    orchestrator.register_agent(task_agent).await.unwrap();

    let (handler, mut rx) = common::collecting_handler();
    let token = ResponseToken::new_for_user("u3");
    orchestrator.register_user_response_handler(token.clone(), handler).await;

    let request = user_request(&token, "u3", "Create a task to research widgets.", "conversation");
    orchestrator.route_message(request).await.unwrap();

    let mut final_reply = None;
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
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

    assert_eq!(specialist_responses.get("research_agent").map(String::as_str), Some("RESEARCH:Create a task to research widgets."));
    assert_eq!(specialist_responses.get("task_agent").map(String::as_str), Some("TASK:Create a task to research widgets."));
}

#[tokio::test]
async fn an_unregistered_token_s_final_reply_is_recoverable_as_an_orphan() {
    let memory_store = Arc::new(InMemoryMemoryStore::new());
    let orchestrator = Orchestrator::new(RuntimeConfig::testing(), memory_store.clone());
    let llm = Arc::new(StaticEchoLlmProvider);
    let gate = Arc::new(Notify::new());

    let conversation = Arc::new(ConversationAgent::new(
        Arc::downgrade(&orchestrator),
        memory_store.clone(),
        llm.clone(),
        RecentHistoryWindow::default(),
    ));
    let coordinator = Arc::new(CoordinatorAgent::new(Arc::downgrade(&orchestrator), memory_store.clone(), llm));
    let research = Arc::new(common::GatedSpecialist::new("research_agent", "research", "RESEARCH:", gate.clone()));
    orchestrator.register_agent(conversation).await.unwrap();
    orchestrator.register_agent(coordinator).await.unwrap();
    orchestrator.register_agent(research).await.unwrap();

    let (handler, mut rx) = common::collecting_handler();
    let token = ResponseToken::new_for_user("u4");
    orchestrator.register_user_response_handler(token.clone(), handler).await;

    let request = user_request(&token, "u4", "Please research widgets.", "conversation");
    orchestrator.route_message(request).await.unwrap();

    let ack = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(ack.is_acknowledged());

    orchestrator.unregister_user_response_handler(&token).await;
    gate.notify_one();

    let mut orphan = None;
    for _ in 0..50 {
        if let Ok(value) = orchestrator.get_orphaned_response(&token).await {
            orphan = Some(value);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let orphan = orphan.expect("the final reply is recoverable as an orphan");
    let content = orphan.get("content").and_then(serde_json::Value::as_str).unwrap_or_default();
    assert!(content.contains("RESEARCH:Please research widgets."));

    assert!(rx.try_recv().is_err(), "the unregistered handler must never have been invoked");
    assert!(orchestrator.get_orphaned_response(&token).await.is_err(), "a second read must find the key already deleted");
}
