//! Enum types for operations, lanes and failure classification

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error when parsing an enum from its string representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// PRIORITY
// ============================================================================

/// Priority lane of an operation.
///
/// Totally ordered `High > Normal > Low`. Each priority owns its own lane and
/// worker pool, so the ordering is used for reporting and tie-breaking rather
/// than cross-lane preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Numeric rank, lower is more urgent (HIGH=0, NORMAL=1, LOW=2).
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(ParseEnumError::new("priority", s)),
        }
    }
}

// ============================================================================
// OPERATION STATUS
// ============================================================================

/// Status of an operation.
///
/// ```text
/// Queued ──→ Running ──→ Completed | Failed | Cancelled
///   ↑           │
///   └─ Retrying ←┘        (Cancelled also reachable from Queued/Retrying)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Queued,
    Running,
    /// Transient marker while a retry timer is pending.
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Retrying)
                | (Retrying, Queued)
                | (Retrying, Failed)
                | (Retrying, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Running => "running",
            OperationStatus::Retrying => "retrying",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(OperationStatus::Queued),
            "running" => Ok(OperationStatus::Running),
            "retrying" => Ok(OperationStatus::Retrying),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "cancelled" => Ok(OperationStatus::Cancelled),
            _ => Err(ParseEnumError::new("operation status", s)),
        }
    }
}

// ============================================================================
// OPERATION TYPE
// ============================================================================

/// Optional category of an operation, used to tune retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CodeReview,
    Testing,
    Development,
    Documentation,
    Deployment,
    ProjectGeneration,
    AgentCreation,
    AgentAssignment,
    ResourceManagement,
    SystemMaintenance,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CodeReview => "code_review",
            OperationType::Testing => "testing",
            OperationType::Development => "development",
            OperationType::Documentation => "documentation",
            OperationType::Deployment => "deployment",
            OperationType::ProjectGeneration => "project_generation",
            OperationType::AgentCreation => "agent_creation",
            OperationType::AgentAssignment => "agent_assignment",
            OperationType::ResourceManagement => "resource_management",
            OperationType::SystemMaintenance => "system_maintenance",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code_review" => Ok(OperationType::CodeReview),
            "testing" => Ok(OperationType::Testing),
            "development" => Ok(OperationType::Development),
            "documentation" => Ok(OperationType::Documentation),
            "deployment" => Ok(OperationType::Deployment),
            "project_generation" => Ok(OperationType::ProjectGeneration),
            "agent_creation" => Ok(OperationType::AgentCreation),
            "agent_assignment" => Ok(OperationType::AgentAssignment),
            "resource_management" => Ok(OperationType::ResourceManagement),
            "system_maintenance" => Ok(OperationType::SystemMaintenance),
            _ => Err(ParseEnumError::new("operation type", s)),
        }
    }
}

// ============================================================================
// FAILURE CLASSIFICATION
// ============================================================================

/// Strategy used to space out retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategy {
    NoRetry,
    Immediate,
    LinearBackoff,
    ExponentialBackoff,
}

/// Retry behavior attached to an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPolicy {
    pub strategy: RetryStrategy,
    pub max_retries: u32,
}

/// Classification of an operation failure. Drives retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Caller error, never retried
    Validation,
    /// Generic handler failure (also used for unclassified failures and panics)
    Execution,
    /// Handler exceeded its deadline
    Timeout,
    /// Circuit open or contention
    ResourceBusy,
    /// External dependency unreachable
    Network,
    /// No handler registered for the capability
    NoHandler,
    /// Operation was cancelled
    Cancelled,
}

impl ErrorKind {
    /// Default retry policy for this kind.
    pub fn default_policy(&self) -> KindPolicy {
        let (strategy, max_retries) = match self {
            ErrorKind::Validation | ErrorKind::NoHandler | ErrorKind::Cancelled => {
                (RetryStrategy::NoRetry, 0)
            }
            ErrorKind::Execution => (RetryStrategy::ExponentialBackoff, 3),
            ErrorKind::Timeout => (RetryStrategy::LinearBackoff, 3),
            ErrorKind::ResourceBusy => (RetryStrategy::LinearBackoff, 3),
            ErrorKind::Network => (RetryStrategy::ExponentialBackoff, 5),
        };
        KindPolicy {
            strategy,
            max_retries,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.default_policy().strategy != RetryStrategy::NoRetry
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Execution => "EXECUTION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ResourceBusy => "RESOURCE_BUSY",
            ErrorKind::Network => "NETWORK",
            ErrorKind::NoHandler => "NO_HANDLER",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// Circuit breaker state for an operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected with RESOURCE_BUSY
    Open,
    /// One trial call is allowed through to test recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
