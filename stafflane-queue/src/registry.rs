//! Capability handler registry

use serde_json::Value;
use stafflane_core::{CapabilityHandler, FnHandler, OperationContext, OperationError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Maps capability names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CapabilityHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for `capability`.
    pub async fn register(
        &self,
        capability: impl Into<String>,
        handler: Arc<dyn CapabilityHandler>,
    ) {
        let capability = capability.into();
        let replaced = self
            .handlers
            .write()
            .await
            .insert(capability.clone(), handler)
            .is_some();
        info!(capability = %capability, replaced, "Registered capability handler");
    }

    /// Register an async closure as a handler.
    pub async fn register_fn<F, Fut>(&self, capability: impl Into<String>, func: F)
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        self.register(capability, Arc::new(FnHandler::new(func))).await;
    }

    pub async fn unregister(&self, capability: &str) -> bool {
        self.handlers.write().await.remove(capability).is_some()
    }

    pub async fn get(&self, capability: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.read().await.get(capability).cloned()
    }

    /// Registered capability names, sorted.
    pub async fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stafflane_core::{CancellationToken, Operation, Priority};

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = HandlerRegistry::new();
        registry
            .register_fn("echo", |ctx: OperationContext| async move {
                Ok::<_, OperationError>(ctx.params().clone())
            })
            .await;

        assert_eq!(registry.capabilities().await, vec!["echo".to_string()]);
        assert!(registry.get("missing").await.is_none());

        let handler = registry.get("echo").await.unwrap();
        let mut op = Operation::new("p", "a", "echo", Priority::Normal);
        op.params = json!([1, 2, 3]);
        let out = handler
            .execute(OperationContext::new(op, CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(out, json!([1, 2, 3]));

        assert!(registry.unregister("echo").await);
        assert!(registry.get("echo").await.is_none());
    }
}
