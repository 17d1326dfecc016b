//! The `Operation` entity and inbound `OperationRequest`

use crate::{
    new_operation_id, ErrorKind, Metadata, OperationError, OperationId, OperationStatus,
    OperationType, Priority, QueueError, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

// ============================================================================
// METADATA KEYS
// ============================================================================

/// Number of retries scheduled so far. The first execution is retry 0.
pub const META_RETRY_COUNT: &str = "retry_count";

/// Rendered error of the most recent failed attempt.
pub const META_LAST_ERROR: &str = "last_error";

/// RFC 3339 timestamp of the next scheduled retry.
pub const META_NEXT_RETRY: &str = "next_retry";

/// Structured terminal failure, see [`FinalError`].
pub const META_FINAL_ERROR: &str = "final_error";

/// Retries scheduled because the circuit was open. Separate from `retry_count`.
pub const META_CIRCUIT_RETRIES: &str = "circuit_retries";

/// Most recent error returned by the handler itself.
pub const META_HANDLER_ERROR: &str = "handler_error";

/// Terminal failure details stored under `metadata.final_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_count: u32,
    #[serde(default)]
    pub context: Value,
}

/// Result of applying a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changed.
    Applied,
    /// The operation was already in the requested terminal status.
    Unchanged,
}

// ============================================================================
// OPERATION
// ============================================================================

/// A unit of agent work tracked through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub project_id: String,
    pub agent_id: String,
    pub capability: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<OperationType>,
    pub priority: Priority,
    pub status: OperationStatus,
    pub progress: f64,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub params: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Operation {
    /// Create a QUEUED operation with a fresh id.
    pub fn new(
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
        capability: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: new_operation_id(),
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            capability: capability.into(),
            operation_type: None,
            priority,
            status: OperationStatus::Queued,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            params: Value::Null,
            result: None,
            error: None,
            metadata: Metadata::new(),
        }
    }

    /// Build an operation from a request. Callers validate the request first.
    pub fn from_request(request: OperationRequest) -> Self {
        let mut op = Self::new(
            request.project_id,
            request.agent_id,
            request.capability,
            request.priority.unwrap_or_default(),
        );
        op.operation_type = request.operation_type;
        op.params = request.params.unwrap_or(Value::Null);
        op.metadata = request.metadata.unwrap_or_default();
        op
    }

    /// Set progress, clamped to [0, 100]. NaN is treated as 0.
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 100.0)
        };
    }

    /// Move to `next`, enforcing the state machine.
    ///
    /// Re-applying the current terminal status is a no-op returning
    /// [`Transition::Unchanged`].
    pub fn transition_to(&mut self, next: OperationStatus) -> Result<Transition, QueueError> {
        if self.status == next && next.is_terminal() {
            return Ok(Transition::Unchanged);
        }
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            OperationStatus::Running => self.started_at = Some(now),
            OperationStatus::Completed => {
                self.progress = 100.0;
                self.completed_at = Some(now);
            }
            OperationStatus::Failed | OperationStatus::Cancelled => self.completed_at = Some(now),
            OperationStatus::Queued | OperationStatus::Retrying => {}
        }
        self.status = next;
        Ok(Transition::Applied)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Key used for retry history and circuit breaking.
    pub fn circuit_key(&self) -> String {
        format!("{}:{}", self.project_id, self.id)
    }

    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get(META_RETRY_COUNT)
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.metadata.get(META_LAST_ERROR).and_then(Value::as_str)
    }

    pub fn final_error(&self) -> Option<FinalError> {
        self.metadata
            .get(META_FINAL_ERROR)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn circuit_retries(&self) -> u32 {
        self.metadata
            .get(META_CIRCUIT_RETRIES)
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    /// Last error the handler returned, if it has failed before.
    pub fn handler_error(&self) -> Option<OperationError> {
        self.metadata
            .get(META_HANDLER_ERROR)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Record bookkeeping for a retry after a handler failure.
    pub fn record_retry(&mut self, attempt: u32, error: &OperationError, next_retry: Timestamp) {
        self.metadata
            .insert(META_RETRY_COUNT.to_string(), Value::from(attempt));
        self.remember_handler_error(error);
        self.schedule(error, next_retry);
    }

    /// Record a retry after an open-circuit rejection. `retry_count` is untouched.
    pub fn record_circuit_retry(
        &mut self,
        attempt: u32,
        rejection: &OperationError,
        next_retry: Timestamp,
    ) {
        self.metadata
            .insert(META_CIRCUIT_RETRIES.to_string(), Value::from(attempt));
        self.schedule(rejection, next_retry);
    }

    fn schedule(&mut self, error: &OperationError, next_retry: Timestamp) {
        self.metadata
            .insert(META_LAST_ERROR.to_string(), Value::from(error.to_string()));
        self.metadata.insert(
            META_NEXT_RETRY.to_string(),
            Value::from(next_retry.to_rfc3339()),
        );
    }

    fn remember_handler_error(&mut self, error: &OperationError) {
        if let Ok(value) = serde_json::to_value(error) {
            self.metadata.insert(META_HANDLER_ERROR.to_string(), value);
        }
    }

    /// Record the terminal failure in `error` and `metadata.final_error`.
    pub fn record_final_error(&mut self, error: &OperationError) {
        self.remember_handler_error(error);
        self.finish_with(error, error.context.clone());
    }

    /// Give up after the circuit stayed open past the rejection budget.
    ///
    /// `final_error` keeps the handler's last error and carries the
    /// rejection's breaker details as context.
    pub fn record_circuit_final_error(&mut self, rejection: &OperationError) {
        let cause = self.handler_error().unwrap_or_else(|| rejection.clone());
        let mut context = match &rejection.context {
            Value::Object(map) => map.clone(),
            _ => Metadata::new(),
        };
        context.insert("circuit_state".to_string(), Value::from("open"));
        context.insert(
            "circuit_retries".to_string(),
            Value::from(self.circuit_retries()),
        );
        context.insert("rejection".to_string(), Value::from(rejection.message.clone()));
        self.finish_with(&cause, Value::Object(context));
        self.metadata.insert(
            META_LAST_ERROR.to_string(),
            Value::from(rejection.to_string()),
        );
    }

    fn finish_with(&mut self, error: &OperationError, context: Value) {
        let final_error = FinalError {
            kind: error.kind,
            message: error.message.clone(),
            retry_count: self.retry_count(),
            context,
        };
        self.error = Some(error.message.clone());
        self.metadata
            .insert(META_LAST_ERROR.to_string(), Value::from(error.to_string()));
        self.metadata.remove(META_NEXT_RETRY);
        if let Ok(value) = serde_json::to_value(&final_error) {
            self.metadata.insert(META_FINAL_ERROR.to_string(), value);
        }
    }

    /// Wall-clock duration of the last run, if it finished.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        (completed - started).to_std().ok()
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// Inbound request to execute a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub project_id: String,
    pub agent_id: String,
    pub capability: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(rename = "type", default)]
    pub operation_type: Option<OperationType>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl OperationRequest {
    pub fn new(
        project_id: impl Into<String>,
        agent_id: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            agent_id: agent_id.into(),
            capability: capability.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reject requests with blank identifiers or capability.
    pub fn validate(&self) -> Result<(), QueueError> {
        for (field, value) in [
            ("project_id", &self.project_id),
            ("agent_id", &self.agent_id),
            ("capability", &self.capability),
        ] {
            if value.trim().is_empty() {
                return Err(QueueError::InvalidRequest {
                    field: field.to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}
