//! In-memory `MemoryStore` test double, `DashMap`-backed for the same O(1) concurrent-access
//! property the donor gives its in-process registries.

use super::{MemoryStore, MemoryStoreError, MemoryStoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Deterministic in-memory store used by unit and property tests.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn store(&self, key: &str, value: serde_json::Value) -> MemoryStoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn store_with_ttl(&self, key: &str, value: serde_json::Value, ttl: Duration) -> MemoryStoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> MemoryStoreResult<Option<serde_json::Value>> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired() => {
                drop(entry);
                self.entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn get_multiple(&self, keys: &[String]) -> MemoryStoreResult<HashMap<String, serde_json::Value>> {
        let mut result = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                result.insert(key.clone(), value);
            }
        }
        Ok(result)
    }

    async fn delete(&self, key: &str) -> MemoryStoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize) -> MemoryStoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        keys.truncate(limit);
        Ok(keys)
    }
}

#[allow(dead_code)]
fn _not_found(key: &str) -> MemoryStoreError {
    MemoryStoreError::NotFound(key.to_string())
}
