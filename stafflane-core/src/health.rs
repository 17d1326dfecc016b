//! Engine health report

use crate::constants::DEGRADED_QUEUE_DEPTH;
use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Health status for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Operational, but circuits are open or lanes are backing up
    Degraded,
    /// Workers are not running
    Unhealthy,
}

/// Point-in-time health of an operation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub workers_running: bool,
    pub open_circuits: usize,
    pub queued: usize,
    pub running: usize,
    pub message: Option<String>,
    pub checked_at: Timestamp,
}

impl HealthReport {
    /// Derive a report from raw engine readings.
    ///
    /// `deepest_lane` is the size of the fullest priority lane.
    pub fn evaluate(
        workers_running: bool,
        open_circuits: usize,
        queued: usize,
        running: usize,
        deepest_lane: usize,
    ) -> Self {
        let (status, message) = if !workers_running {
            (HealthStatus::Unhealthy, Some("workers are not running".to_string()))
        } else if open_circuits > 0 {
            (
                HealthStatus::Degraded,
                Some(format!("{open_circuits} circuit(s) open")),
            )
        } else if deepest_lane > DEGRADED_QUEUE_DEPTH {
            (
                HealthStatus::Degraded,
                Some(format!("lane depth {deepest_lane} exceeds {DEGRADED_QUEUE_DEPTH}")),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        Self {
            status,
            workers_running,
            open_circuits,
            queued,
            running,
            message,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
