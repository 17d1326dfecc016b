#![allow(dead_code)]

use stafflane_core::{
    CapabilityHandler, EngineConfig, Operation, OperationId, OperationStatus, Scope,
};
use stafflane_queue::{OperationQueue, StatusEvent, Subscription};
use stafflane_test_utils::EchoHandler;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Started queue with an `echo` handler registered.
pub async fn started_queue(config: EngineConfig) -> OperationQueue {
    let queue = OperationQueue::new(config).expect("valid test config");
    queue
        .register_handler("echo", Arc::new(EchoHandler::new()))
        .await;
    queue.start().expect("queue starts once");
    queue
}

pub async fn register(
    queue: &OperationQueue,
    capability: &str,
    handler: Arc<dyn CapabilityHandler>,
) {
    queue.register_handler(capability, handler).await;
}

/// Poll until `id` reaches `status`, panicking after [`WAIT`].
pub async fn wait_for_status(
    queue: &OperationQueue,
    id: OperationId,
    status: OperationStatus,
) -> Operation {
    wait_until(queue, id, WAIT, |op| op.status == status).await
}

/// Poll until the operation satisfies `ready`, panicking after `limit`.
pub async fn wait_until(
    queue: &OperationQueue,
    id: OperationId,
    limit: Duration,
    ready: impl Fn(&Operation) -> bool,
) -> Operation {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(op) = queue.get(id).await {
            if ready(&op) {
                return op;
            }
        }
        if Instant::now() >= deadline {
            panic!(
                "operation {id} not ready after {limit:?}, last seen {:?}",
                queue.get(id).await.map(|op| op.status)
            );
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `id` is terminal.
pub async fn wait_for_terminal(queue: &OperationQueue, id: OperationId) -> Operation {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(op) = queue.get(id).await {
            if op.is_terminal() {
                return op;
            }
        }
        if Instant::now() >= deadline {
            panic!("operation {id} never finished");
        }
        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn subscribe(queue: &OperationQueue, scopes: &[Scope]) -> Subscription {
    queue
        .subscribe(scopes.iter().cloned().collect::<HashSet<_>>())
        .await
}

/// Receive events until one for `id` with a terminal type arrives.
pub async fn events_until_terminal(sub: &mut Subscription, id: OperationId) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(WAIT, sub.receiver.recv())
            .await
            .expect("event before timeout")
            .expect("subscription open");
        let done = event
            .operation()
            .is_some_and(|op| op.id == id && op.is_terminal());
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Everything already buffered on the subscription.
pub fn drain(sub: &mut Subscription) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = sub.receiver.try_recv() {
        events.push(event);
    }
    events
}
