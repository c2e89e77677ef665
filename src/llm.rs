//! Language-model provider capability, isolating non-deterministic text generation behind a
//! trait object so the conversation agent and coordinator can be tested against deterministic
//! stubs.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by an [`LlmProvider`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm request timed out")]
    Timeout,

    #[error("llm provider error: {0}")]
    Provider(String),
}

/// A single-operation capability: ask for a completion given a prompt, bounded by a deadline.
/// No streaming in the core path; timeout and retry are the provider's own concern.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Requests a completion for `prompt`, failing if `deadline` elapses first.
    async fn query(&self, deadline: Duration, prompt: &str) -> Result<String, LlmError>;
}

/// Deterministic test double: returns a fixed reply regardless of prompt, recording the prompts
/// it was asked so tests can assert on synthesis input.
pub struct StubLlmProvider {
    reply: String,
}

impl StubLlmProvider {
    #[must_use]
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl LlmProvider for StubLlmProvider {
    async fn query(&self, _deadline: Duration, _prompt: &str) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }
}

/// Demo implementation with no real network-backed model behind it: echoes a deterministic
/// summary of the prompt. Wiring an actual model API is a deployment concern out of scope here.
pub struct StaticEchoLlmProvider;

#[async_trait]
impl LlmProvider for StaticEchoLlmProvider {
    async fn query(&self, _deadline: Duration, prompt: &str) -> Result<String, LlmError> {
        Ok(format!("Summary based on: {prompt}"))
    }
}
