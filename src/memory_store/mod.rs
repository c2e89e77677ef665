//! Key/value memory store capability consumed by the orchestrator, coordinator, and task tool.
//!
//! This is an external collaborator per the specification: its interface is specified here,
//! its internals are not core to the orchestration runtime. Two implementations ship with this
//! crate: [`sqlite::SqliteMemoryStore`] for durable, restart-surviving storage, and
//! [`in_memory::InMemoryMemoryStore`] as an injectable test double — mirroring the donor's
//! practice of pairing every storage trait with both a real and an in-memory implementation.

pub mod in_memory;
pub mod sqlite;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a memory store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for memory store operations.
pub type MemoryStoreResult<T> = Result<T, MemoryStoreError>;

/// Opaque key/value store with TTL and prefix-listing support.
///
/// Values are JSON (`serde_json::Value`) so callers can marshal arbitrary payloads without the
/// store itself knowing their shape — the core marshals task/coordination/message payloads
/// before handing them to the store, matching §6's "values are opaque but must round-trip
/// through JSON-like serialization" contract.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Stores a value with no expiry.
    async fn store(&self, key: &str, value: serde_json::Value) -> MemoryStoreResult<()>;

    /// Stores a value that expires after `ttl`.
    async fn store_with_ttl(&self, key: &str, value: serde_json::Value, ttl: Duration) -> MemoryStoreResult<()>;

    /// Retrieves a value, or `Ok(None)` if absent or expired.
    async fn get(&self, key: &str) -> MemoryStoreResult<Option<serde_json::Value>>;

    /// Retrieves several values in one call; missing/expired keys are simply absent from the
    /// result map.
    async fn get_multiple(&self, keys: &[String]) -> MemoryStoreResult<std::collections::HashMap<String, serde_json::Value>>;

    /// Deletes a key. Idempotent: deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> MemoryStoreResult<()>;

    /// Lists up to `limit` keys starting with `prefix`.
    async fn list(&self, prefix: &str, limit: usize) -> MemoryStoreResult<Vec<String>>;
}
