//! WebSocket frontend. One reader loop per connection dispatches decoded
//! commands to the gateway; a writer task drains the connection's outbound
//! channel so pushes from the completion loop never block on the socket.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::gateway::codec::{self, Command};
use crate::gateway::registry::ConnectionId;
use crate::gateway::{Gateway, IngestOutcome};
use crate::models::messages::{Outbound, Pong, ServerMessage};
use crate::state::AppState;

/// Per-connection outbound queue. A client that falls this far behind loses
/// pushes (see `deliver`).
const OUTBOUND_QUEUE: usize = 64;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let gateway = Arc::clone(&state.gateway);
    ws.on_upgrade(move |socket| run_connection(socket, gateway))
}

pub async fn run_connection(socket: WebSocket, gateway: Arc<Gateway>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let connection_id = gateway.connect(tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Message(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize outbound message: {e}");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!("Connection {connection_id} read error: {e}");
                break;
            }
        };

        let command = match message {
            Message::Text(text) => codec::parse_text(&text),
            Message::Binary(data) => codec::parse_binary(&data),
            Message::Ping(_) | Message::Pong(_) => {
                gateway.touch(connection_id);
                continue;
            }
            Message::Close(_) => break,
        };

        let reply = match command {
            Ok(command) => dispatch(&gateway, connection_id, command),
            Err(e) => {
                debug!("Connection {connection_id} sent a bad message: {e}");
                Some(ServerMessage::Error(e.to_event()))
            }
        };

        if let Some(reply) = reply {
            match tx.try_send(Outbound::Message(reply)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Outbound queue full for connection {connection_id}; dropping reply");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }

    gateway.disconnect(connection_id);
    drop(tx);
    let _ = writer.await;
}

/// Runs one command and returns the direct reply, if any. Fresh analysis
/// results are not replies; they arrive later through the outbound channel.
pub fn dispatch(
    gateway: &Gateway,
    connection_id: ConnectionId,
    command: Command,
) -> Option<ServerMessage> {
    let reply = match command {
        Command::Auth {
            session_id,
            user_id,
        } => gateway
            .authenticate(connection_id, &session_id, user_id.as_deref())
            .map(ServerMessage::Status),
        Command::Media {
            modality,
            payload,
            client_timestamp,
        } => match gateway.ingest(connection_id, modality, payload, client_timestamp) {
            Ok(IngestOutcome::Skipped(push)) => Ok(ServerMessage::analysis(modality, push)),
            Ok(IngestOutcome::Submitted {
                generation,
                sequence_id,
            }) => {
                debug!(
                    "Connection {connection_id}: {modality} record {sequence_id} submitted as job {generation}"
                );
                return None;
            }
            Ok(IngestOutcome::Unsupported | IngestOutcome::Idle) => return None,
            Err(e) => Err(e),
        },
        Command::Ping { timestamp } => {
            gateway.touch(connection_id);
            Ok(ServerMessage::Pong(Pong {
                timestamp,
                server_time: Utc::now(),
            }))
        }
        Command::GetStatus => gateway.status(connection_id).map(ServerMessage::Status),
    };

    Some(reply.unwrap_or_else(|e| ServerMessage::Error(e.to_event())))
}
