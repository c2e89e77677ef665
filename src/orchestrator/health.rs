//! System health snapshot derivation for the orchestrator's `GetSystemHealth` operation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Composite health status, derived from agent error ratio and queue pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Critical,
    Offline,
}

/// A point-in-time snapshot of orchestrator health, persisted with a 7-day TTL by the health
/// monitor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub agent_count: usize,
    pub active_count: usize,
    pub error_count: usize,
    pub task_counts: HashMap<String, usize>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub uptime_ms: u64,
    pub status: SystemStatus,
}

/// Healthy -> Degraded (errors present or queue at least 80% full) -> Critical (more than half
/// of registered agents are in `Error` state). Offline when the orchestrator is not running,
/// checked before anything else.
#[must_use]
pub fn derive_status(running: bool, agent_count: usize, error_count: usize, queue_depth: usize, queue_capacity: usize) -> SystemStatus {
    if !running {
        return SystemStatus::Offline;
    }
    if agent_count > 0 && error_count * 2 > agent_count {
        return SystemStatus::Critical;
    }
    let queue_pressure = queue_capacity > 0 && queue_depth * 5 >= queue_capacity * 4;
    if error_count > 0 || queue_pressure {
        return SystemStatus::Degraded;
    }
    SystemStatus::Healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_when_not_running() {
        assert_eq!(derive_status(false, 5, 0, 0, 100), SystemStatus::Offline);
    }

    #[test]
    fn critical_when_more_than_half_agents_errored() {
        assert_eq!(derive_status(true, 4, 3, 0, 100), SystemStatus::Critical);
    }

    #[test]
    fn not_critical_at_exactly_half() {
        assert_eq!(derive_status(true, 4, 2, 0, 100), SystemStatus::Degraded);
    }

    #[test]
    fn degraded_when_queue_nearing_capacity() {
        assert_eq!(derive_status(true, 4, 0, 81, 100), SystemStatus::Degraded);
    }

    #[test]
    fn healthy_otherwise() {
        assert_eq!(derive_status(true, 4, 0, 10, 100), SystemStatus::Healthy);
    }
}
