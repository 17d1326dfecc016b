//! WebSocket Status Streaming
//!
//! Clients connect to `/api/v1/ws?scopes=project:p1,agent:a1` and receive
//! JSON-serialized [`StatusEvent`]s for operations inside their scopes. The
//! first message is always `initial_state`.
//!
//! ## Client messages
//!
//! - `{"type":"subscribe","subscriptions":["all"]}` replaces the scope set
//! - `{"type":"unsubscribe","subscriptions":["agent:a1"]}` removes scopes;
//!   an empty or missing list removes all of them
//! - `{"type":"ping"}` is answered with `pong`
//!
//! Any inbound frame counts as a heartbeat. A socket that stays silent for
//! the configured heartbeat timeout is closed.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use stafflane_core::{parse_scopes, Scope};
use stafflane_queue::{OperationQueue, StatusEvent, SubscriberId};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Query string of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Comma-separated scopes. Missing means `all`.
    pub scopes: Option<String>,
}

/// Message sent by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        subscriptions: Vec<Scope>,
    },
    Unsubscribe {
        #[serde(default)]
        subscriptions: Vec<Scope>,
    },
    Ping,
}

/// Control message sent by the server alongside status events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong { timestamp: DateTime<Utc> },
    Subscribed { subscriptions: Vec<Scope> },
    Error { message: String },
}

type WsSink = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler.
///
/// Invalid scopes are rejected with 400 before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> ApiResult<Response> {
    let scopes = match query.scopes.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_scopes(raw)?,
        _ => HashSet::from([Scope::All]),
    };

    info!(scopes = ?scopes, "WebSocket connection request");

    let queue = state.queue.clone();
    let heartbeat = state.ws_heartbeat_timeout;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, queue, scopes, heartbeat)))
}

async fn handle_socket(
    socket: WebSocket,
    queue: OperationQueue,
    scopes: HashSet<Scope>,
    heartbeat: Duration,
) {
    let mut subscription = queue.subscribe(scopes).await;
    let subscriber_id = subscription.id;
    info!(subscriber_id = %subscriber_id, "WebSocket connected");

    let (mut sender, mut incoming) = socket.split();
    let idle = tokio::time::sleep(heartbeat);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                let Some(event) = event else {
                    debug!(subscriber_id = %subscriber_id, "Subscription closed");
                    break;
                };
                if let Err(e) = send_event(&mut sender, &event).await {
                    error!(subscriber_id = %subscriber_id, error = %e, "Failed to send event, closing connection");
                    break;
                }
            }

            frame = incoming.next() => {
                idle.as_mut().reset(Instant::now() + heartbeat);
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&queue, subscriber_id, &text);
                        if let Some(reply) = reply {
                            if let Err(e) = send_json(&mut sender, &reply).await {
                                error!(subscriber_id = %subscriber_id, error = %e, "Failed to send reply");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(subscriber_id = %subscriber_id, "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(subscriber_id = %subscriber_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }

            _ = &mut idle => {
                info!(subscriber_id = %subscriber_id, "Heartbeat timeout, closing connection");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    queue.unsubscribe(subscriber_id);
    info!(subscriber_id = %subscriber_id, "WebSocket disconnected");
}

/// Apply a client message and return the reply, if any.
fn handle_client_message(
    queue: &OperationQueue,
    subscriber_id: SubscriberId,
    text: &str,
) -> Option<ServerMessage> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(subscriber_id = %subscriber_id, error = %e, "Rejected client message");
            return Some(ServerMessage::Error {
                message: format!("Invalid message: {}", e),
            });
        }
    };

    match message {
        ClientMessage::Ping => Some(ServerMessage::Pong {
            timestamp: Utc::now(),
        }),
        ClientMessage::Subscribe { subscriptions } => {
            let scopes: HashSet<Scope> = subscriptions.iter().cloned().collect();
            queue.set_scopes(subscriber_id, scopes);
            Some(ServerMessage::Subscribed { subscriptions })
        }
        ClientMessage::Unsubscribe { subscriptions } => {
            if subscriptions.is_empty() {
                queue.set_scopes(subscriber_id, HashSet::new());
            } else {
                let scopes: HashSet<Scope> = subscriptions.into_iter().collect();
                queue.remove_scopes(subscriber_id, &scopes);
            }
            None
        }
    }
}

async fn send_event(sender: &mut WsSink, event: &StatusEvent) -> Result<(), axum::Error> {
    send_json(sender, event).await
}

async fn send_json<T: Serialize>(sender: &mut WsSink, value: &T) -> Result<(), axum::Error> {
    let json = serde_json::to_string(value).map_err(|e| {
        error!(error = %e, "Failed to serialize message");
        axum::Error::new(e)
    })?;

    sender.send(Message::Text(json)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_subscribe_message() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "subscribe",
            "subscriptions": ["project:p1", "system"]
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                subscriptions: vec![Scope::Project("p1".to_string()), Scope::System]
            }
        );
    }

    #[test]
    fn test_parse_unsubscribe_without_list() {
        let msg: ClientMessage = serde_json::from_value(json!({"type": "unsubscribe"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Unsubscribe {
                subscriptions: vec![]
            }
        );
    }

    #[test]
    fn test_invalid_scope_in_subscribe_is_rejected() {
        let result = serde_json::from_value::<ClientMessage>(json!({
            "type": "subscribe",
            "subscriptions": ["tenant:x"]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_message_tagging() {
        let value = serde_json::to_value(ServerMessage::Error {
            message: "nope".to_string(),
        })
        .unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "nope");

        let pong = serde_json::to_value(ServerMessage::Pong {
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(pong["type"], "pong");
    }
}
