//! WebSocket handler for device proxies and subscribers
//!
//! Outgoing messages are [`DaemonEvent`]s. Device proxies report their
//! devices and raw occurrences with [`ProxyMessage`]s.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chord_core::DeviceId;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, DaemonEvent};

/// Messages sent by a device proxy
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum ProxyMessage {
    Joined {
        id: String,
        #[serde(rename = "type")]
        device_type: String,
        #[serde(default)]
        name: Option<String>,
    },
    Left {
        id: String,
    },
    Event {
        id: String,
        event: String,
        #[serde(default)]
        value: Option<String>,
    },
}

/// Direct replies to the connected client
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum Reply {
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { message: String },
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Send current device list on connect
    for device in state.devices().await {
        let msg = DaemonEvent::DeviceJoined(device);
        if let Ok(json) = serde_json::to_string(&msg) {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Event channel lagged");
                    }
                    Err(e) => {
                        debug!(error = %e, "Event channel error");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let reply = if text.as_str() == "ping" {
                            Some(Reply::Pong)
                        } else {
                            handle_proxy_message(&state, text.as_str()).await
                        };
                        if let Some(reply) = reply {
                            if let Ok(json) = serde_json::to_string(&reply) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

/// Apply a proxy message; returns an error reply when it fails
async fn handle_proxy_message(state: &AppState, text: &str) -> Option<Reply> {
    let msg: ProxyMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed WebSocket message");
            return Some(Reply::Error {
                message: e.to_string(),
            });
        }
    };

    let result = match msg {
        ProxyMessage::Joined {
            id,
            device_type,
            name,
        } => state
            .join_device(Some(DeviceId::new(id)), &device_type, name.as_deref(), true)
            .await
            .map(|_| ()),
        ProxyMessage::Left { id } => {
            state.leave_device(&DeviceId::new(id)).await;
            Ok(())
        }
        ProxyMessage::Event { id, event, value } => state
            .trigger(&DeviceId::new(id), &event, value, None)
            .await
            .map(|_| ()),
    };

    result.err().map(|e| Reply::Error {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_message_format() {
        let msg: ProxyMessage = serde_json::from_str(
            r#"{"type": "joined", "data": {"id": "p1", "type": "phone", "name": "pixel"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ProxyMessage::Joined { ref device_type, .. } if device_type == "phone"
        ));

        let msg: ProxyMessage =
            serde_json::from_str(r#"{"type": "event", "data": {"id": "p1", "event": "shake"}}"#)
                .unwrap();
        assert!(matches!(msg, ProxyMessage::Event { value: None, .. }));
    }

    #[test]
    fn test_reply_format() {
        let json = serde_json::to_value(Reply::Pong).unwrap();
        assert_eq!(json["type"], "pong");
    }
}
