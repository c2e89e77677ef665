//! Validated domain types backing the message bus, task store, and coordination records.
//!
//! Every identifier and bounded scalar in this crate is a `nutype`-validated newtype rather
//! than a bare `String`/`usize`, so that invalid values cannot be constructed anywhere in the
//! call graph.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while validating a domain value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The supplied value failed a construction-time invariant.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the field being validated.
        field: String,
        /// Human-readable reason the value was rejected.
        reason: String,
    },
}

#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct AgentId(String);

impl AgentId {
    /// Reserved id naming the orchestrator itself as a routing recipient.
    pub const ORCHESTRATOR: &'static str = "orchestrator";

    /// Prefix identifying an ephemeral user-response token rather than a real agent.
    pub const USER_RESPONSE_PREFIX: &'static str = "user_response_";

    /// Mints a fresh id for an internally generated agent (e.g. a dynamically spawned specialist).
    #[must_use]
    pub fn new_generated() -> Self {
        Self::try_new(Uuid::new_v4().to_string()).expect("generated uuid is non-empty")
    }

    /// True when this id names the orchestrator's own internal recipient.
    #[must_use]
    pub fn is_orchestrator(&self) -> bool {
        self.as_ref() == Self::ORCHESTRATOR
    }

    /// True when this id is an ephemeral user-response token rather than a registered agent.
    #[must_use]
    pub fn is_user_response_token(&self) -> bool {
        self.as_ref().starts_with(Self::USER_RESPONSE_PREFIX)
    }
}

#[nutype(
    validate(predicate = |id| !id.is_nil()),
    derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)
)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4()).expect("uuid v4 is never nil")
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_inner())
    }
}

#[nutype(
    validate(predicate = |id| !id.is_nil()),
    derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)
)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh task id.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(Uuid::new_v4()).expect("uuid v4 is never nil")
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_inner())
    }
}

#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derives the conversation id synthesized from a `user_id`: `conv_<user_id>`.
    #[must_use]
    pub fn from_user_id(user_id: &str) -> Self {
        Self::try_new(format!("conv_{user_id}")).expect("non-empty user id yields non-empty id")
    }
}

/// A coordination's id is deterministically derived from its owning task id, coupling the two
/// id spaces by construction so that `coord_<task_id>` collisions are impossible exactly when
/// task ids are unique (see DESIGN.md, Open Question resolution).
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 300),
    derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct CoordinationId(String);

impl CoordinationId {
    /// Builds the coordination id owned by a given task.
    #[must_use]
    pub fn for_task(task_id: TaskId) -> Self {
        Self::try_new(format!("coord_{task_id}")).expect("task id renders to non-empty string")
    }
}

/// A `user_response_*` token naming a one-shot callback rather than a registered agent.
#[nutype(
    sanitize(trim),
    validate(predicate = |s| s.starts_with(AgentId::USER_RESPONSE_PREFIX) && s.len() > AgentId::USER_RESPONSE_PREFIX.len()),
    derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct ResponseToken(String);

impl ResponseToken {
    /// Mints a fresh token for a user session.
    #[must_use]
    pub fn new_for_user(user_id: &str) -> Self {
        Self::try_new(format!(
            "{}{user_id}_{}",
            AgentId::USER_RESPONSE_PREFIX,
            Uuid::new_v4()
        ))
        .expect("constructed token always carries the reserved prefix")
    }

    /// View this token as an `AgentId` for routing purposes (every `Message.to` entry is an
    /// `AgentId`, including response tokens).
    #[must_use]
    pub fn as_agent_id(&self) -> AgentId {
        AgentId::try_new(self.as_ref().to_string()).expect("token is already a valid agent id")
    }
}

#[nutype(
    validate(predicate = |v| !v.is_empty() && v.chars().count() <= 1_000_000),
    derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, AsRef)
)]
pub struct MessageContent(String);

/// Message priority, ordinal 1 (lowest) to 4 (highest), matching the public task record's
/// `priority (1-4)` wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    /// Numeric ordinal used in the public wire representation.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

#[nutype(
    validate(predicate = |v| *v <= 100),
    default = 0,
    derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Default, Serialize, Deserialize, AsRef)
)]
pub struct Workload(u8);

#[nutype(
    validate(greater_or_equal = 1),
    default = 1000,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize, AsRef)
)]
pub struct QueueCapacity(usize);

#[nutype(
    validate(greater_or_equal = 1),
    default = 500,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize, AsRef)
)]
pub struct EventQueueCapacity(usize);

#[nutype(
    default = 7_200,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize, AsRef)
)]
pub struct OrphanTtlSeconds(u64);

#[nutype(
    default = 604_800,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize, AsRef)
)]
pub struct HealthSnapshotTtlSeconds(u64);

#[nutype(
    default = 30_000,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize, AsRef)
)]
pub struct AgentStopDeadlineMs(u64);

#[nutype(
    validate(greater_or_equal = 1),
    default = 10,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize, AsRef)
)]
pub struct RecentHistoryWindow(usize);

#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    default = 10,
    derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize, AsRef)
)]
pub struct ConnectionPoolSize(u32);

impl ConnectionPoolSize {
    /// Pool size as `usize` for sizing collections/pools.
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.into_inner() as usize
    }
}

/// Wraps `chrono::DateTime<Utc>` so timestamps carry the same "validated domain value" idiom as
/// every other field, replacing the donor's `SystemTime`-based wrapper with a `chrono` one since
/// coordination timing math (durations, comparisons) is simpler under `chrono`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(chrono::DateTime<chrono::Utc>);

impl Timestamp {
    /// Captures the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Underlying `chrono` value.
    #[must_use]
    pub fn inner(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }

    /// Milliseconds elapsed between `self` and `other`, saturating at zero if `other` precedes
    /// `self`.
    #[must_use]
    pub fn elapsed_ms_since(&self, other: Self) -> i64 {
        (self.0 - other.0).num_milliseconds().max(0)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
