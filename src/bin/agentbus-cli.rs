//! agentbus CLI
//!
//! Thin development tool for exercising a running orchestrator: wires up a conversation agent
//! and a coordinator against an in-memory store, routes a single message, and prints the reply.
//! Not part of the bus's contract (see SPEC_FULL.md section 6) — just a manual-testing aid.

use agentbus::domain_types::{AgentId, MessageContent, ResponseToken};
use agentbus::llm::StaticEchoLlmProvider;
use agentbus::memory_store::in_memory::InMemoryMemoryStore;
use agentbus::message::{Message, MessageType};
use agentbus::{ConversationAgent, CoordinatorAgent, Orchestrator, RuntimeConfig};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

/// Route a single message through a freshly wired orchestrator and print the reply.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// User id the message is sent on behalf of.
    #[arg(long, default_value = "dev-user")]
    user_id: String,

    /// Message content to route to the conversation agent.
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let memory_store = Arc::new(InMemoryMemoryStore::new());
    let orchestrator = Orchestrator::new(RuntimeConfig::development(), memory_store.clone());

    let llm = Arc::new(StaticEchoLlmProvider);
    let conversation = Arc::new(ConversationAgent::new(
        Arc::downgrade(&orchestrator),
        memory_store.clone(),
        llm.clone(),
        agentbus::domain_types::RecentHistoryWindow::default(),
    ));
    let coordinator = Arc::new(CoordinatorAgent::new(Arc::downgrade(&orchestrator), memory_store, llm));

    orchestrator.register_agent(conversation).await?;
    orchestrator.register_agent(coordinator).await?;
    orchestrator.start(Duration::from_secs(5)).await?;

    let token = ResponseToken::new_for_user(&args.user_id);
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    orchestrator
        .register_user_response_handler(
            token.clone(),
            Arc::new(move |message: Message| {
                if let Some(tx) = tx.lock().expect("handler mutex poisoned").take() {
                    let _ = tx.send(message.content.as_ref().to_string());
                }
            }),
        )
        .await;

    let request = Message::builder(token.as_agent_id(), MessageType::Request, MessageContent::try_new(args.message)?)
        .to(AgentId::try_new("conversation")?)
        .context_entry(agentbus::message::context_keys::USER_ID, serde_json::json!(args.user_id))
        .build();

    orchestrator.route_message(request).await?;

    match tokio::time::timeout(Duration::from_secs(10), rx).await {
        Ok(Ok(reply)) => println!("{reply}"),
        Ok(Err(_)) => eprintln!("handler channel closed without a reply"),
        Err(_) => eprintln!("timed out waiting for a reply"),
    }

    orchestrator.stop(Duration::from_secs(5)).await?;
    Ok(())
}
