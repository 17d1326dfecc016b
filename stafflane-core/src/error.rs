//! Error types for Stafflane operations

use crate::{ErrorKind, OperationId, OperationStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Classified failure returned by a capability handler.
///
/// The `kind` drives retry policy. `max_retries` overrides the kind's default
/// retry budget when a handler knows better.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub context: Value,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            max_retries: None,
            context: Value::Null,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("handler exceeded deadline of {}ms", after.as_millis()),
        )
    }

    pub fn resource_busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceBusy, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn no_handler(capability: &str) -> Self {
        Self::new(
            ErrorKind::NoHandler,
            format!("no handler registered for capability '{capability}'"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && self.max_retries != Some(0)
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(err: serde_json::Error) -> Self {
        OperationError::validation(format!("invalid params: {err}"))
    }
}

/// Errors returned by the queue service API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Operation not found: {id}")]
    NotFound { id: OperationId },

    #[error("Invalid transition for operation {id}: {from} -> {to}")]
    InvalidTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Operation {id} is already queued")]
    Duplicate { id: OperationId },

    #[error("Queue is shut down")]
    ShutDown,

    #[error("Invalid request field {field}: {reason}")]
    InvalidRequest { field: String, reason: String },

    #[error("Queue workers already started")]
    AlreadyStarted,

    #[error("Telemetry error: {reason}")]
    Telemetry { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Master error type for all Stafflane errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StafflaneError {
    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Stafflane operations.
pub type StafflaneResult<T> = Result<T, StafflaneError>;

/// Result type alias for queue service calls.
pub type QueueResult<T> = Result<T, QueueError>;
