//! Status Event Types
//!
//! Messages delivered to subscribers. Every message serializes as a JSON
//! object whose `type` field names the event.

use crate::lane::LaneSnapshot;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stafflane_core::{Operation, OperationStatus, Priority, Timestamp};
use std::collections::BTreeMap;

/// Lane sizes and execution counts broadcast to `system` subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queues: BTreeMap<Priority, LaneSnapshot>,
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub total_workers: usize,
    pub open_circuits: usize,
}

/// Kind of an operation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationEvent {
    Queued,
    Running,
    Progress,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl OperationEvent {
    /// Event announcing that an operation entered `status`.
    pub fn for_status(status: OperationStatus) -> Self {
        match status {
            OperationStatus::Queued => OperationEvent::Queued,
            OperationStatus::Running => OperationEvent::Running,
            OperationStatus::Retrying => OperationEvent::Retrying,
            OperationStatus::Completed => OperationEvent::Completed,
            OperationStatus::Failed => OperationEvent::Failed,
            OperationStatus::Cancelled => OperationEvent::Cancelled,
        }
    }
}

/// Message sent to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    // ========================================================================
    // OPERATION EVENTS
    // ========================================================================
    Queued {
        timestamp: Timestamp,
        operation: Operation,
    },

    Running {
        timestamp: Timestamp,
        operation: Operation,
    },

    /// Handler-reported progress while running.
    Progress {
        timestamp: Timestamp,
        operation: Operation,
    },

    /// A retry has been scheduled.
    Retrying {
        timestamp: Timestamp,
        operation: Operation,
    },

    Completed {
        timestamp: Timestamp,
        operation: Operation,
    },

    Failed {
        timestamp: Timestamp,
        operation: Operation,
    },

    Cancelled {
        timestamp: Timestamp,
        operation: Operation,
    },

    // ========================================================================
    // SYSTEM EVENTS
    // ========================================================================
    /// Periodic lane snapshot for `system` subscribers.
    QueueStatus {
        timestamp: Timestamp,
        queue_status: QueueStatus,
    },

    /// Active operations matching a new subscription.
    InitialState {
        timestamp: Timestamp,
        operations: Vec<Operation>,
    },
}

impl StatusEvent {
    pub fn operation_event(kind: OperationEvent, operation: Operation) -> Self {
        let timestamp = Utc::now();
        match kind {
            OperationEvent::Queued => StatusEvent::Queued {
                timestamp,
                operation,
            },
            OperationEvent::Running => StatusEvent::Running {
                timestamp,
                operation,
            },
            OperationEvent::Progress => StatusEvent::Progress {
                timestamp,
                operation,
            },
            OperationEvent::Retrying => StatusEvent::Retrying {
                timestamp,
                operation,
            },
            OperationEvent::Completed => StatusEvent::Completed {
                timestamp,
                operation,
            },
            OperationEvent::Failed => StatusEvent::Failed {
                timestamp,
                operation,
            },
            OperationEvent::Cancelled => StatusEvent::Cancelled {
                timestamp,
                operation,
            },
        }
    }

    pub fn queue_status(queue_status: QueueStatus) -> Self {
        StatusEvent::QueueStatus {
            timestamp: Utc::now(),
            queue_status,
        }
    }

    pub fn initial_state(operations: Vec<Operation>) -> Self {
        StatusEvent::InitialState {
            timestamp: Utc::now(),
            operations,
        }
    }

    /// The operation carried by an operation event.
    pub fn operation(&self) -> Option<&Operation> {
        match self {
            StatusEvent::Queued { operation, .. }
            | StatusEvent::Running { operation, .. }
            | StatusEvent::Progress { operation, .. }
            | StatusEvent::Retrying { operation, .. }
            | StatusEvent::Completed { operation, .. }
            | StatusEvent::Failed { operation, .. }
            | StatusEvent::Cancelled { operation, .. } => Some(operation),
            StatusEvent::QueueStatus { .. } | StatusEvent::InitialState { .. } => None,
        }
    }

    /// Get the event type as a string, matching the serialized `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            StatusEvent::Queued { .. } => "queued",
            StatusEvent::Running { .. } => "running",
            StatusEvent::Progress { .. } => "progress",
            StatusEvent::Retrying { .. } => "retrying",
            StatusEvent::Completed { .. } => "completed",
            StatusEvent::Failed { .. } => "failed",
            StatusEvent::Cancelled { .. } => "cancelled",
            StatusEvent::QueueStatus { .. } => "queue_status",
            StatusEvent::InitialState { .. } => "initial_state",
        }
    }
}
