#![allow(dead_code)]

use axum::Router;
use stafflane_api::capabilities::register_builtin;
use stafflane_api::{create_router, ApiConfig, AppState};
use stafflane_core::{OperationId, OperationStatus};
use stafflane_queue::OperationQueue;
use stafflane_test_utils::fixtures::fast_config;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Started queue with the built-in capabilities registered.
pub async fn started_queue() -> OperationQueue {
    let queue = OperationQueue::new(fast_config()).expect("valid test config");
    register_builtin(&queue).await;
    queue.start().expect("queue starts once");
    queue
}

pub fn app(queue: &OperationQueue) -> Router {
    app_with_heartbeat(queue, Duration::from_secs(35))
}

pub fn app_with_heartbeat(queue: &OperationQueue, heartbeat: Duration) -> Router {
    let config = ApiConfig {
        ws_heartbeat_timeout: heartbeat,
        ..ApiConfig::default()
    };
    create_router(AppState::new(queue.clone(), &config))
}

/// Serve `router` on an ephemeral localhost port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Poll the queue until `id` reaches `status`.
pub async fn wait_for_status(queue: &OperationQueue, id: OperationId, status: OperationStatus) {
    let deadline = Instant::now() + WAIT;
    loop {
        if queue.status(id).await == Some(status) {
            return;
        }
        if Instant::now() >= deadline {
            panic!("operation {id} did not reach {status}");
        }
        sleep(Duration::from_millis(5)).await;
    }
}
