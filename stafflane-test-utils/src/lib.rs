//! Stafflane Test Utilities
//!
//! Shared test infrastructure for the Stafflane workspace:
//! - Mock capability handlers with call counting
//! - Proptest generators for core types
//! - Configuration fixtures with short timings
//! - Assertions over operation state

// Re-export core types for convenience
pub use stafflane_core::{
    CancellationToken, CapabilityHandler, EngineConfig, ErrorKind, Operation, OperationContext,
    OperationError, OperationId, OperationRequest, OperationStatus, OperationType, Priority,
    Scope,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK HANDLERS
// ============================================================================

/// Returns the operation params as the result.
#[derive(Debug, Default)]
pub struct EchoHandler {
    calls: AtomicU32,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityHandler for EchoHandler {
    async fn execute(&self, ctx: OperationContext) -> Result<Value, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ctx.params().clone())
    }
}

/// Always fails with a clone of the configured error.
#[derive(Debug)]
pub struct FailingHandler {
    error: OperationError,
    calls: AtomicU32,
}

impl FailingHandler {
    pub fn new(error: OperationError) -> Self {
        Self {
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityHandler for FailingHandler {
    async fn execute(&self, _ctx: OperationContext) -> Result<Value, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Fails the first `failures` calls, then succeeds with `{"attempt": n}`.
#[derive(Debug)]
pub struct FlakyHandler {
    failures: u32,
    error: OperationError,
    calls: AtomicU32,
}

impl FlakyHandler {
    pub fn new(failures: u32, error: OperationError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityHandler for FlakyHandler {
    async fn execute(&self, _ctx: OperationContext) -> Result<Value, OperationError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(self.error.clone())
        } else {
            Ok(json!({ "attempt": attempt }))
        }
    }
}

/// Sleeps for `delay` unless cancelled first.
#[derive(Debug)]
pub struct SlowHandler {
    delay: Duration,
    calls: AtomicU32,
}

impl SlowHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityHandler for SlowHandler {
    async fn execute(&self, ctx: OperationContext) -> Result<Value, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(json!({ "slept_ms": self.delay.as_millis() as u64 })),
            _ = ctx.cancellation().cancelled() => Err(OperationError::cancelled()),
        }
    }
}

/// Panics on every call.
#[derive(Debug, Default)]
pub struct PanickingHandler;

#[async_trait]
impl CapabilityHandler for PanickingHandler {
    async fn execute(&self, _ctx: OperationContext) -> Result<Value, OperationError> {
        panic!("handler exploded");
    }
}

/// Reports each step in `steps` as progress, then succeeds.
#[derive(Debug)]
pub struct ProgressHandler {
    steps: Vec<f64>,
    pause: Duration,
}

impl ProgressHandler {
    pub fn new(steps: Vec<f64>, pause: Duration) -> Self {
        Self { steps, pause }
    }
}

#[async_trait]
impl CapabilityHandler for ProgressHandler {
    async fn execute(&self, ctx: OperationContext) -> Result<Value, OperationError> {
        for step in &self.steps {
            ctx.check_cancelled()?;
            ctx.report_progress(*step).await;
            tokio::time::sleep(self.pause).await;
        }
        Ok(json!({ "steps": self.steps.len() }))
    }
}

/// Records the order in which operations were executed.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<OperationId>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<OperationId> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CapabilityHandler for RecordingHandler {
    async fn execute(&self, ctx: OperationContext) -> Result<Value, OperationError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.operation().id);
        Ok(Value::Null)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Stafflane core types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::High),
            Just(Priority::Normal),
            Just(Priority::Low),
        ]
    }

    pub fn arb_operation_type() -> impl Strategy<Value = OperationType> {
        prop_oneof![
            Just(OperationType::CodeReview),
            Just(OperationType::Testing),
            Just(OperationType::Development),
            Just(OperationType::Documentation),
            Just(OperationType::Deployment),
            Just(OperationType::ProjectGeneration),
            Just(OperationType::AgentCreation),
            Just(OperationType::AgentAssignment),
            Just(OperationType::ResourceManagement),
            Just(OperationType::SystemMaintenance),
        ]
    }

    pub fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
        prop_oneof![
            Just(ErrorKind::Validation),
            Just(ErrorKind::Execution),
            Just(ErrorKind::Timeout),
            Just(ErrorKind::ResourceBusy),
            Just(ErrorKind::Network),
            Just(ErrorKind::NoHandler),
            Just(ErrorKind::Cancelled),
        ]
    }

    pub fn arb_status() -> impl Strategy<Value = OperationStatus> {
        prop_oneof![
            Just(OperationStatus::Queued),
            Just(OperationStatus::Running),
            Just(OperationStatus::Retrying),
            Just(OperationStatus::Completed),
            Just(OperationStatus::Failed),
            Just(OperationStatus::Cancelled),
        ]
    }

    /// Non-blank identifier such as a project or agent id.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    pub fn arb_scope() -> impl Strategy<Value = Scope> {
        prop_oneof![
            Just(Scope::All),
            Just(Scope::System),
            arb_identifier().prop_map(Scope::Project),
            arb_identifier().prop_map(Scope::Agent),
        ]
    }

    /// Valid request with optional type and small params.
    pub fn arb_operation_request() -> impl Strategy<Value = OperationRequest> {
        (
            arb_identifier(),
            arb_identifier(),
            arb_identifier(),
            arb_priority(),
            proptest::option::of(arb_operation_type()),
            any::<u16>(),
        )
            .prop_map(|(project, agent, capability, priority, op_type, n)| {
                let mut request = OperationRequest::new(project, agent, capability)
                    .with_priority(priority)
                    .with_params(json!({ "n": n }));
                if let Some(op_type) = op_type {
                    request = request.with_type(op_type);
                }
                request
            })
    }

    /// Fresh QUEUED operation built from an arbitrary request.
    pub fn arb_operation() -> impl Strategy<Value = Operation> {
        arb_operation_request().prop_map(Operation::from_request)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and requests.

    use super::*;

    /// Millisecond timings, no jitter, no adaptive history.
    pub fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::development();
        config.workers.workers_per_lane = 2;
        config.workers.handler_timeout = Duration::from_secs(5);
        config.retry.base_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(200);
        config.retry.resource_busy_base_delay = Duration::from_millis(20);
        config.retry.jitter = 0.0;
        config.retry.adaptive = false;
        config.circuit_breaker.reset_timeout = Duration::from_millis(200);
        config.circuit_breaker.cleanup_interval = Duration::from_secs(60);
        config.publisher.queue_status_interval = Duration::from_millis(100);
        config.metrics.sample_interval = Duration::from_millis(100);
        config
    }

    /// [`fast_config`] with circuit breakers switched off.
    pub fn fast_config_without_breaker() -> EngineConfig {
        let mut config = fast_config();
        config.circuit_breaker.enabled = false;
        config
    }

    pub fn echo_request(priority: Priority) -> OperationRequest {
        OperationRequest::new("proj-1", "agent-1", "echo")
            .with_priority(priority)
            .with_params(json!({ "message": "hello" }))
    }

    pub fn request_for(capability: &str) -> OperationRequest {
        OperationRequest::new("proj-1", "agent-1", capability)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over operation state.

    use super::*;

    #[track_caller]
    pub fn assert_status(op: &Operation, expected: OperationStatus) {
        assert_eq!(
            op.status, expected,
            "Expected operation {} to be {}, got {}",
            op.id, expected, op.status
        );
    }

    /// Terminal operations carry `completed_at` and never a pending retry.
    #[track_caller]
    pub fn assert_terminal(op: &Operation) {
        assert!(op.is_terminal(), "Expected terminal status, got {}", op.status);
        assert!(
            op.completed_at.is_some(),
            "Terminal operation {} has no completed_at",
            op.id
        );
    }

    #[track_caller]
    pub fn assert_completed_with(op: &Operation, expected: &Value) {
        assert_status(op, OperationStatus::Completed);
        assert_eq!(op.result.as_ref(), Some(expected));
        assert_eq!(op.progress, 100.0);
    }

    #[track_caller]
    pub fn assert_failed_with_kind(op: &Operation, kind: ErrorKind) {
        assert_status(op, OperationStatus::Failed);
        let final_error = op
            .final_error()
            .unwrap_or_else(|| panic!("Failed operation {} has no final_error", op.id));
        assert_eq!(final_error.kind, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_generated_requests_are_valid(request in arb_operation_request()) {
            prop_assert!(request.validate().is_ok());
        }

        #[test]
        fn prop_generated_operations_start_queued(op in arb_operation()) {
            prop_assert_eq!(op.status, OperationStatus::Queued);
            prop_assert_eq!(op.retry_count(), 0);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_scope_roundtrip(scope in arb_scope()) {
            let text = scope.to_string();
            prop_assert_eq!(text.parse::<Scope>(), Ok(scope.clone()));

            let encoded = serde_json::to_value(&scope).unwrap();
            prop_assert_eq!(encoded.as_str(), Some(text.as_str()));
            let decoded: Scope = serde_json::from_value(encoded).unwrap();
            prop_assert_eq!(decoded, scope);
        }

        #[test]
        fn prop_transition_table(from in arb_status(), to in arb_status()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to), "{} -> {} allowed", from, to);
            }
            if to == OperationStatus::Running && from.can_transition_to(to) {
                prop_assert_eq!(from, OperationStatus::Queued);
            }
            prop_assert!(!from.can_transition_to(from), "{} -> {} allowed", from, from);
        }

        #[test]
        fn prop_error_kind_budget_matches_retryability(
            kind in arb_error_kind(),
            message in "[a-z ]{1,20}",
        ) {
            let policy = kind.default_policy();
            prop_assert_eq!(kind.is_retryable(), policy.max_retries > 0);

            let err = OperationError::new(kind, message.clone());
            prop_assert_eq!(err.to_string(), format!("{}: {}", kind, message));
        }
    }

    #[tokio::test]
    async fn test_flaky_handler_recovers() {
        let handler = FlakyHandler::new(2, OperationError::network("down"));
        let ctx = || {
            OperationContext::new(
                Operation::new("p", "a", "flaky", Priority::Normal),
                CancellationToken::new(),
            )
        };
        assert!(handler.execute(ctx()).await.is_err());
        assert!(handler.execute(ctx()).await.is_err());
        assert_eq!(handler.execute(ctx()).await.unwrap(), json!({ "attempt": 3 }));
        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test]
    async fn test_slow_handler_honours_cancellation() {
        let handler = SlowHandler::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();
        let ctx = OperationContext::new(
            Operation::new("p", "a", "slow", Priority::Low),
            token,
        );
        let err = handler.execute(ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
