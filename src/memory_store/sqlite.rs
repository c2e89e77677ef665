//! `SQLite`-backed durable `MemoryStore`, following the donor's functional-core/imperative-shell
//! split between pure SQL/row-mapping and the async I/O shell.

use super::{MemoryStore, MemoryStoreError, MemoryStoreResult};
use crate::database::DatabaseConnection;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Pure query construction and row mapping, no I/O.
mod sql {
    pub const UPSERT: &str =
        "INSERT INTO memory_store (key, value, created_at, expires_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, created_at = excluded.created_at, expires_at = excluded.expires_at";
    pub const SELECT: &str = "SELECT value, expires_at FROM memory_store WHERE key = ?";
    pub const DELETE: &str = "DELETE FROM memory_store WHERE key = ?";
    pub const LIST_PREFIX: &str = "SELECT key FROM memory_store WHERE key LIKE ? ORDER BY key LIMIT ?";

    /// Escapes `%`/`_` in a literal prefix and appends the `LIKE` wildcard.
    pub fn like_prefix_pattern(prefix: &str) -> String {
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("{escaped}%")
    }

    /// True when `expires_at` (unix millis, nullable) has passed as of `now_millis`.
    pub fn is_expired(expires_at: Option<i64>, now_millis: i64) -> bool {
        expires_at.is_some_and(|at| now_millis >= at)
    }
}

/// Durable `MemoryStore` implementation backed by `SQLite` through `sqlx`.
pub struct SqliteMemoryStore {
    connection: DatabaseConnection,
}

impl SqliteMemoryStore {
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn store(&self, key: &str, value: serde_json::Value) -> MemoryStoreResult<()> {
        let serialized = value.to_string();
        sqlx::query(sql::UPSERT)
            .bind(key)
            .bind(serialized)
            .bind(Self::now_millis())
            .bind(Option::<i64>::None)
            .execute(self.connection.pool())
            .await
            .map_err(|e| MemoryStoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn store_with_ttl(&self, key: &str, value: serde_json::Value, ttl: Duration) -> MemoryStoreResult<()> {
        let serialized = value.to_string();
        let expires_at = Self::now_millis() + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        sqlx::query(sql::UPSERT)
            .bind(key)
            .bind(serialized)
            .bind(Self::now_millis())
            .bind(Some(expires_at))
            .execute(self.connection.pool())
            .await
            .map_err(|e| MemoryStoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> MemoryStoreResult<Option<serde_json::Value>> {
        use sqlx::Row;

        let row = sqlx::query(sql::SELECT)
            .bind(key)
            .fetch_optional(self.connection.pool())
            .await
            .map_err(|e| MemoryStoreError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_value: String = row.get("value");
        let expires_at: Option<i64> = row.get("expires_at");

        if sql::is_expired(expires_at, Self::now_millis()) {
            self.delete(key).await?;
            return Ok(None);
        }

        let value = serde_json::from_str(&raw_value)
            .map_err(|e| MemoryStoreError::Backend(format!("corrupt stored value for {key}: {e}")))?;
        Ok(Some(value))
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
        sqlx::query(sql::DELETE)
            .bind(key)
            .execute(self.connection.pool())
            .await
            .map_err(|e| MemoryStoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize) -> MemoryStoreResult<Vec<String>> {
        use sqlx::Row;

        let pattern = sql::like_prefix_pattern(prefix);
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(sql::LIST_PREFIX)
            .bind(pattern)
            .bind(limit_i64)
            .fetch_all(self.connection.pool())
            .await
            .map_err(|e| MemoryStoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(|row| row.get::<String, _>("key")).collect())
    }
}
