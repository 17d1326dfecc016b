//! WebSocket status stream tests against a live server

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use stafflane_core::{OperationRequest, Priority};
use stafflane_queue::OperationQueue;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[path = "support/server.rs"]
mod support;
use support::{app, app_with_heartbeat, spawn_server, started_queue, WAIT};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/api/v1/ws{query}");
    let (client, _) = connect_async(url).await.expect("websocket handshake");
    client
}

/// Next JSON text message, skipping control frames.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(WAIT, client.next())
            .await
            .expect("message before timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("json message");
        }
    }
}

/// Read messages until one has `type == kind`.
async fn next_of_type(client: &mut Client, kind: &str) -> Value {
    loop {
        let msg = next_json(client).await;
        if msg["type"] == kind {
            return msg;
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .expect("send client message");
}

fn echo(project: &str, agent: &str) -> OperationRequest {
    OperationRequest::new(project, agent, "echo")
        .with_priority(Priority::High)
        .with_params(json!({"message": "hi"}))
}

async fn server(queue: &OperationQueue) -> SocketAddr {
    spawn_server(app(queue)).await
}

#[tokio::test]
async fn test_first_message_is_initial_state() {
    let queue = started_queue().await;
    let addr = server(&queue).await;

    let mut client = connect(addr, "").await;
    let first = next_json(&mut client).await;

    assert_eq!(first["type"], "initial_state");
    assert!(first["operations"].as_array().unwrap().is_empty());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_streams_operation_lifecycle() {
    let queue = started_queue().await;
    let addr = server(&queue).await;
    let mut client = connect(addr, "?scopes=project:proj-ws").await;
    assert_eq!(next_json(&mut client).await["type"], "initial_state");

    let op = queue.submit(echo("proj-ws", "agent-1")).await.unwrap();

    let mut kinds = Vec::new();
    loop {
        let msg = next_json(&mut client).await;
        assert_eq!(msg["operation"]["id"], op.id.to_string());
        let kind = msg["type"].as_str().unwrap().to_string();
        kinds.push(kind.clone());
        if kind == "completed" {
            assert_eq!(msg["operation"]["result"], json!({"message": "hi"}));
            break;
        }
    }
    assert_eq!(kinds.first().map(String::as_str), Some("queued"));
    assert!(kinds.contains(&"running".to_string()));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_events_outside_scope_are_filtered() {
    let queue = started_queue().await;
    let addr = server(&queue).await;
    let mut client = connect(addr, "?scopes=agent:wanted").await;
    assert_eq!(next_json(&mut client).await["type"], "initial_state");

    queue.submit(echo("proj-1", "other")).await.unwrap();
    let wanted = queue.submit(echo("proj-1", "wanted")).await.unwrap();

    let msg = next_json(&mut client).await;
    assert_eq!(msg["operation"]["id"], wanted.id.to_string());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_ping_gets_pong() {
    let queue = started_queue().await;
    let addr = server(&queue).await;
    let mut client = connect(addr, "").await;
    next_json(&mut client).await;

    send_json(&mut client, json!({"type": "ping"})).await;
    let pong = next_of_type(&mut client, "pong").await;

    assert!(pong["timestamp"].is_string());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_message_replaces_scopes() {
    let queue = started_queue().await;
    let addr = server(&queue).await;
    let mut client = connect(addr, "?scopes=project:old").await;
    next_json(&mut client).await;

    send_json(
        &mut client,
        json!({"type": "subscribe", "subscriptions": ["project:new"]}),
    )
    .await;
    let ack = next_of_type(&mut client, "subscribed").await;
    assert_eq!(ack["subscriptions"], json!(["project:new"]));

    queue.submit(echo("old", "agent-1")).await.unwrap();
    let fresh = queue.submit(echo("new", "agent-1")).await.unwrap();

    let msg = next_json(&mut client).await;
    assert_eq!(msg["operation"]["id"], fresh.id.to_string());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_invalid_client_message_gets_error() {
    let queue = started_queue().await;
    let addr = server(&queue).await;
    let mut client = connect(addr, "").await;
    next_json(&mut client).await;

    send_json(&mut client, json!({"type": "subscribe", "subscriptions": ["team:x"]})).await;
    let err = next_of_type(&mut client, "error").await;

    assert!(err["message"].as_str().unwrap().contains("Invalid message"));
    queue.shutdown().await;
}

#[tokio::test]
async fn test_system_scope_receives_queue_status() {
    let queue = started_queue().await;
    let addr = server(&queue).await;
    let mut client = connect(addr, "?scopes=system").await;

    assert_eq!(next_json(&mut client).await["type"], "initial_state");
    let status = next_of_type(&mut client, "queue_status").await;

    assert_eq!(status["queue_status"]["total_workers"], 6);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_invalid_scope_query_is_rejected() {
    let queue = started_queue().await;
    let addr = server(&queue).await;

    let url = format!("ws://{addr}/api/v1/ws?scopes=team:x");
    assert!(connect_async(url).await.is_err());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_silent_client_is_closed_after_heartbeat_timeout() {
    let queue = started_queue().await;
    let addr = spawn_server(app_with_heartbeat(&queue, Duration::from_millis(200))).await;
    let mut client = connect(addr, "").await;
    next_json(&mut client).await;

    let closed = timeout(WAIT, async {
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        true
    })
    .await;

    assert!(closed.unwrap_or(false), "socket should close after heartbeat timeout");
    queue.shutdown().await;
}
