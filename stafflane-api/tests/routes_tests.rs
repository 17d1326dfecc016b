//! REST route tests driven through the router with `tower::ServiceExt`

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use stafflane_core::OperationStatus;
use stafflane_queue::OperationQueue;
use stafflane_test_utils::fixtures::fast_config;
use stafflane_test_utils::SlowHandler;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "support/server.rs"]
mod support;
use support::{app, started_queue, wait_for_status};

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn echo_body() -> Value {
    json!({
        "project_id": "proj-1",
        "agent_id": "agent-1",
        "capability": "echo",
        "priority": "high",
        "params": {"message": "hello"}
    })
}

#[tokio::test]
async fn test_submit_returns_created_operation() {
    let queue = started_queue().await;
    let router = app(&queue);

    let (status, body) = send(&router, Method::POST, "/api/v1/operations", Some(echo_body())).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["capability"], "echo");
    assert_eq!(body["priority"], "high");
    assert!(body["id"].as_str().is_some());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_submitted_operation_completes_and_is_fetchable() {
    let queue = started_queue().await;
    let router = app(&queue);

    let (_, created) = send(&router, Method::POST, "/api/v1/operations", Some(echo_body())).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&queue, id, OperationStatus::Completed).await;

    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/v1/operations/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"], json!({"message": "hello"}));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_submit_rejects_blank_capability() {
    let queue = started_queue().await;
    let router = app(&queue);

    let mut request = echo_body();
    request["capability"] = json!("  ");
    let (status, body) = send(&router, Method::POST, "/api/v1/operations", Some(request)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["details"]["field"], "capability");
    queue.shutdown().await;
}

#[tokio::test]
async fn test_unknown_operation_is_not_found() {
    let queue = started_queue().await;
    let router = app(&queue);
    let id = Uuid::now_v7();

    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/v1/operations/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "OPERATION_NOT_FOUND");

    let (status, _) = send(
        &router,
        Method::DELETE,
        &format!("/api/v1/operations/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_operation_is_idempotent() {
    let queue = started_queue().await;
    queue
        .register_handler("slow", Arc::new(SlowHandler::new(Duration::from_secs(30))))
        .await;
    let router = app(&queue);

    let mut request = echo_body();
    request["capability"] = json!("slow");
    let (_, created) = send(&router, Method::POST, "/api/v1/operations", Some(request)).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&queue, id, OperationStatus::Running).await;

    let uri = format!("/api/v1/operations/{id}");
    let (status, body) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    queue.shutdown().await;
}

#[tokio::test]
async fn test_cancel_completed_operation_conflicts() {
    let queue = started_queue().await;
    let router = app(&queue);

    let (_, created) = send(&router, Method::POST, "/api/v1/operations", Some(echo_body())).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&queue, id, OperationStatus::Completed).await;

    let (status, body) = send(
        &router,
        Method::DELETE,
        &format!("/api/v1/operations/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STATE_CONFLICT");
    assert_eq!(body["details"]["status"], "completed");
    queue.shutdown().await;
}

#[tokio::test]
async fn test_list_operations_shows_active_only() {
    let queue = started_queue().await;
    queue
        .register_handler("slow", Arc::new(SlowHandler::new(Duration::from_secs(30))))
        .await;
    let router = app(&queue);

    let mut request = echo_body();
    request["capability"] = json!("slow");
    let (_, created) = send(&router, Method::POST, "/api/v1/operations", Some(request)).await;
    let slow_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    let (_, done) = send(&router, Method::POST, "/api/v1/operations", Some(echo_body())).await;
    let done_id: Uuid = done["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&queue, done_id, OperationStatus::Completed).await;

    let (status, body) = send(&router, Method::GET, "/api/v1/operations", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|op| op["id"].as_str())
        .collect();
    assert_eq!(ids, vec![slow_id.to_string().as_str()]);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_queue_status_reports_lanes() {
    let queue = started_queue().await;
    let router = app(&queue);

    let (status, body) = send(&router, Method::GET, "/api/v1/queue/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_workers"], 6);
    for lane in ["high", "normal", "low"] {
        assert!(body["queues"].get(lane).is_some(), "missing lane {lane}");
    }
    queue.shutdown().await;
}

#[tokio::test]
async fn test_health_reflects_worker_state() {
    let queue = OperationQueue::new(fast_config()).unwrap();
    let router = app(&queue);

    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    queue.start().unwrap();
    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["workers_running"], true);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoints() {
    let queue = started_queue().await;
    let router = app(&queue);
    let (_, created) = send(&router, Method::POST, "/api/v1/operations", Some(echo_body())).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    wait_for_status(&queue, id, OperationStatus::Completed).await;

    let (status, body) = send(&router, Method::GET, "/api/v1/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operations"]["submitted"], 1);
    assert_eq!(body["operations"]["completed"], 1);

    let (status, body) = send(&router, Method::GET, "/api/v1/metrics/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["recent"].is_array());

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("stafflane_circuit_rejections_total"));
    assert!(text.contains("stafflane_operations_total"));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_submit_after_shutdown_is_unavailable() {
    let queue = started_queue().await;
    let router = app(&queue);
    queue.shutdown().await;

    let (status, body) = send(&router, Method::POST, "/api/v1/operations", Some(echo_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

