//! Capability handler trait and the context passed to handlers

use crate::{Operation, OperationError, OperationId};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes one capability.
///
/// Handlers receive an [`OperationContext`] and return the operation result or
/// a classified [`OperationError`]. Long-running handlers should watch the
/// context's cancellation token.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn execute(&self, ctx: OperationContext) -> Result<Value, OperationError>;
}

/// Sink for handler-reported progress.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, id: OperationId, progress: f64);
}

/// Everything a handler gets to see about the operation it runs.
#[derive(Clone)]
pub struct OperationContext {
    operation: Operation,
    cancellation: CancellationToken,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl OperationContext {
    pub fn new(operation: Operation, cancellation: CancellationToken) -> Self {
        Self {
            operation,
            cancellation,
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// Snapshot of the operation taken when the attempt started.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn params(&self) -> &Value {
        &self.operation.params
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Return a CANCELLED error if the operation was cancelled.
    pub fn check_cancelled(&self) -> Result<(), OperationError> {
        if self.is_cancelled() {
            Err(OperationError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Report progress (0-100). Does nothing without a reporter.
    pub async fn report_progress(&self, progress: f64) {
        if let Some(reporter) = &self.progress {
            reporter.report(self.operation.id, progress).await;
        }
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("operation_id", &self.operation.id)
            .field("capability", &self.operation.capability)
            .field("cancelled", &self.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

/// Adapts an async closure into a [`CapabilityHandler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
{
    async fn execute(&self, ctx: OperationContext) -> Result<Value, OperationError> {
        (self.func)(ctx).await
    }
}
