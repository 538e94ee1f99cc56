//! Command channel for browser front-ends at `/ws`.
//!
//! Each text frame is a JSON command. `{"type":"heartbeat","action":"send"}`
//! fires one on-demand keep-alive and is answered with
//! `{"type":"heartbeat","action":"result","success":..,"error":..}`. Unknown
//! commands are ignored; malformed JSON is answered with `{"type":"error"}`.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::AppState;
use crate::session::SessionCoordinator;
use crate::transport::WsTransport;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Command {
    #[serde(rename = "type")]
    kind: String,
    action: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Reply {
    Heartbeat {
        action: &'static str,
        success: bool,
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

pub(super) async fn upgrade<T: WsTransport>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<T>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.session))
}

async fn handle_socket<T: WsTransport>(mut socket: WebSocket, session: SessionCoordinator<T>) {
    info!("front-end channel opened");
    while let Some(frame) = socket.recv().await {
        let reply = match frame {
            Ok(Message::Text(text)) => command_reply(&session, text.as_str().as_bytes()).await,
            Ok(Message::Binary(data)) => command_reply(&session, &data).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(error = %err, "front-end channel read failed");
                break;
            }
        };
        let Some(reply) = reply else {
            continue;
        };
        if socket.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }
    info!("front-end channel closed");
}

async fn command_reply<T: WsTransport>(
    session: &SessionCoordinator<T>,
    raw: &[u8],
) -> Option<String> {
    let reply = match sonic_rs::from_slice::<Command>(raw) {
        Ok(command) if command.kind == "heartbeat" && command.action == "send" => {
            let outcome = session.send_once_keep_alive().await;
            Reply::Heartbeat {
                action: "result",
                success: outcome.success,
                error: outcome.error,
            }
        }
        Ok(command) => {
            debug!(kind = %command.kind, action = %command.action, "ignoring front-end command");
            return None;
        }
        Err(err) => Reply::Error {
            message: err.to_string(),
        },
    };
    match sonic_rs::to_string(&reply) {
        Ok(json) => Some(json),
        Err(err) => {
            warn!(error = %err, "failed to encode front-end reply");
            None
        }
    }
}
