//! Message routing performance benchmarks.
//!
//! Measures the orchestrator's synchronous dispatch path (no router loop running) across
//! growing agent-registry sizes and payload sizes, mirroring how the bus is actually driven
//! in single-shot CLI and test invocations.

use agentbus::agent::{Agent, AgentCore, AgentStateSnapshot};
use agentbus::config::RuntimeConfig;
use agentbus::domain_types::{AgentId, MessageContent};
use agentbus::error::OrchestratorError;
use agentbus::memory_store::in_memory::InMemoryMemoryStore;
use agentbus::message::{Message, MessageType};
use agentbus::orchestrator::Orchestrator;
use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

struct NullAgent {
    core: AgentCore,
}

#[async_trait]
impl Agent for NullAgent {
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
    async fn handle_message(&self, _message: Message) -> Result<Option<Message>, OrchestratorError> {
        Ok(None)
    }
}

fn build_orchestrator(rt: &Runtime, agent_count: usize) -> Arc<Orchestrator> {
    rt.block_on(async {
        let orchestrator = Orchestrator::new(RuntimeConfig::production(), Arc::new(InMemoryMemoryStore::new()));
        for n in 0..agent_count {
            let id = AgentId::try_new(format!("agent-{n}")).unwrap();
            let agent = Arc::new(NullAgent {
                core: AgentCore::new(id.clone(), id.as_ref(), "bench", vec![]),
            });
            orchestrator.register_agent(agent).await.unwrap();
        }
        orchestrator
    })
}

fn make_message(content_size: usize) -> Message {
    let content = "x".repeat(content_size);
    Message::builder(AgentId::try_new("sender").unwrap(), MessageType::Event, MessageContent::try_new(content).unwrap())
        .to(AgentId::try_new("agent-0").unwrap())
        .build()
}

fn bench_route_message(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("route_message");

    for agent_count in [1usize, 10, 100] {
        let orchestrator = build_orchestrator(&rt, agent_count);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("agent_count", agent_count), &agent_count, |b, _| {
            b.to_async(&rt).iter(|| {
                let orchestrator = Arc::clone(&orchestrator);
                async move {
                    let message = make_message(64);
                    black_box(orchestrator.route_message(message).await.unwrap());
                }
            });
        });
    }

    for content_size in [64usize, 1024, 16384] {
        let orchestrator = build_orchestrator(&rt, 1);
        group.throughput(Throughput::Bytes(content_size as u64));
        group.bench_with_input(BenchmarkId::new("content_size", content_size), &content_size, |b, &size| {
            b.to_async(&rt).iter(|| {
                let orchestrator = Arc::clone(&orchestrator);
                async move {
                    let message = make_message(size);
                    black_box(orchestrator.route_message(message).await.unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_route_message);
criterion_main!(benches);
