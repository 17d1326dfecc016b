//! Built-in capabilities registered by the server binary

use async_trait::async_trait;
use serde_json::Value;
use stafflane_core::{CapabilityHandler, OperationContext, OperationError};
use stafflane_queue::OperationQueue;
use std::sync::Arc;

/// Capability name of [`EchoCapability`].
pub const ECHO: &str = "echo";

/// Returns the operation params unchanged.
#[derive(Debug, Default)]
pub struct EchoCapability;

#[async_trait]
impl CapabilityHandler for EchoCapability {
    async fn execute(&self, ctx: OperationContext) -> Result<Value, OperationError> {
        ctx.check_cancelled()?;
        ctx.report_progress(50.0).await;
        Ok(ctx.params().clone())
    }
}

/// Register every built-in capability on `queue`.
pub async fn register_builtin(queue: &OperationQueue) {
    queue.register_handler(ECHO, Arc::new(EchoCapability)).await;
}
