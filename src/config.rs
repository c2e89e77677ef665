//! Layered runtime configuration, following the donor `RouterConfig`'s conventions: validated
//! domain-typed fields, environment presets, a fluent builder, and file round-tripping.

use crate::domain_types::{
    AgentStopDeadlineMs, EventQueueCapacity, HealthSnapshotTtlSeconds, OrphanTtlSeconds, QueueCapacity,
    RecentHistoryWindow,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while building or loading a [`RuntimeConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to read configuration file: {0}")]
    Io(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level runtime configuration for the orchestrator and its cooperating agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub message_queue_capacity: QueueCapacity,
    pub event_queue_capacity: EventQueueCapacity,
    pub orphan_response_ttl: OrphanTtlSeconds,
    pub health_snapshot_ttl: HealthSnapshotTtlSeconds,
    pub agent_stop_deadline_ms: AgentStopDeadlineMs,
    pub recent_history_window: RecentHistoryWindow,
    pub database_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl RuntimeConfig {
    /// Preset tuned for local development: modest queue depths, a file-backed database.
    #[must_use]
    pub fn development() -> Self {
        Self {
            message_queue_capacity: QueueCapacity::default(),
            event_queue_capacity: EventQueueCapacity::default(),
            orphan_response_ttl: OrphanTtlSeconds::default(),
            health_snapshot_ttl: HealthSnapshotTtlSeconds::default(),
            agent_stop_deadline_ms: AgentStopDeadlineMs::default(),
            recent_history_window: RecentHistoryWindow::default(),
            database_path: "agentbus-dev.db".to_string(),
        }
    }

    /// Preset tuned for production: larger queues, longer TTLs.
    ///
    /// # Panics
    ///
    /// Panics if any of the hard-coded bounds below fail validation (indicates a programming
    /// error in this preset, not user input).
    #[must_use]
    pub fn production() -> Self {
        Self {
            message_queue_capacity: QueueCapacity::try_new(10_000).expect("valid preset bound"),
            event_queue_capacity: EventQueueCapacity::try_new(5_000).expect("valid preset bound"),
            orphan_response_ttl: OrphanTtlSeconds::new(7_200),
            health_snapshot_ttl: HealthSnapshotTtlSeconds::new(604_800),
            agent_stop_deadline_ms: AgentStopDeadlineMs::new(30_000),
            recent_history_window: RecentHistoryWindow::try_new(10).expect("valid preset bound"),
            database_path: "agentbus.db".to_string(),
        }
    }

    /// Preset tuned for tests: tiny queues so backpressure scenarios are reachable quickly, an
    /// in-memory-equivalent temp-file database.
    ///
    /// # Panics
    ///
    /// Panics if any of the hard-coded bounds below fail validation (indicates a programming
    /// error in this preset, not user input).
    #[must_use]
    pub fn testing() -> Self {
        Self {
            message_queue_capacity: QueueCapacity::try_new(16).expect("valid preset bound"),
            event_queue_capacity: EventQueueCapacity::try_new(16).expect("valid preset bound"),
            orphan_response_ttl: OrphanTtlSeconds::new(2),
            health_snapshot_ttl: HealthSnapshotTtlSeconds::new(60),
            agent_stop_deadline_ms: AgentStopDeadlineMs::new(1_000),
            recent_history_window: RecentHistoryWindow::try_new(10).expect("valid preset bound"),
            database_path: "agentbus-test.db".to_string(),
        }
    }

    /// Starts a fluent builder seeded from this configuration.
    #[must_use]
    pub fn to_builder(&self) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            config: self.clone(),
        }
    }

    /// Cross-field validation beyond what each field's own type already enforces.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the event queue is not smaller than the message
    /// queue, mirroring the bus's documented capacity relationship (message queue default 1000,
    /// event queue default 500).
    pub fn validate(&self) -> ConfigResult<()> {
        if self.event_queue_capacity.as_ref() > self.message_queue_capacity.as_ref() {
            return Err(ConfigError::Invalid {
                field: "event_queue_capacity".to_string(),
                reason: "event queue capacity must not exceed message queue capacity".to_string(),
            });
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "database_path".to_string(),
                reason: "database path must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Serializes this configuration as JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on a filesystem failure.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`], [`ConfigError::Parse`], or a validation error.
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Fluent builder for [`RuntimeConfig`].
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    #[must_use]
    pub fn message_queue_capacity(mut self, value: QueueCapacity) -> Self {
        self.config.message_queue_capacity = value;
        self
    }

    #[must_use]
    pub fn event_queue_capacity(mut self, value: EventQueueCapacity) -> Self {
        self.config.event_queue_capacity = value;
        self
    }

    #[must_use]
    pub fn database_path(mut self, path: impl Into<String>) -> Self {
        self.config.database_path = path.into();
        self
    }

    /// Validates and finalizes the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure encountered.
    pub fn build(self) -> ConfigResult<RuntimeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
