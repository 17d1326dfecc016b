//! Stafflane Core - Operation Types
//!
//! Data structures shared by every Stafflane crate: the `Operation` entity and
//! its state machine, priorities, error classification, configuration, and the
//! capability handler trait. This crate contains no scheduling logic.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod config;
pub mod constants;
pub mod enums;
pub mod error;
pub mod handler;
pub mod health;
pub mod operation;
pub mod scope;

pub use config::{
    CircuitBreakerConfig, EngineConfig, MetricsConfig, PublisherConfig, RetryConfig, WorkerConfig,
};
pub use enums::{
    CircuitState, ErrorKind, KindPolicy, OperationStatus, OperationType, ParseEnumError, Priority,
    RetryStrategy,
};
pub use error::{
    ConfigError, OperationError, QueueError, QueueResult, StafflaneError, StafflaneResult,
};
pub use handler::{CapabilityHandler, FnHandler, OperationContext, ProgressReporter};
pub use health::{HealthReport, HealthStatus};
pub use operation::{FinalError, Operation, OperationRequest, Transition};
pub use scope::{parse_scopes, Scope, ScopeParseError};

// Re-exported so handler authors don't need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Operation identifier using UUIDv7 for timestamp-sortable IDs.
pub type OperationId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Open key/value bag carried on operations and requests.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Generate a new UUIDv7 operation id.
pub fn new_operation_id() -> OperationId {
    Uuid::now_v7()
}
