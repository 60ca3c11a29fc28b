//! Hub transport: HTTP listener with the WebSocket signaling endpoint and
//! the read-only room snapshot used for pre-join validation.
//!
//! Each accepted socket gets a fresh connection id and two pumps: a write
//! pump draining the member's outbound queue into the sink, and a read loop
//! translating text frames into [`HubCommand`]s. Both ends funnel into the
//! single hub task; the transport holds no shared state of its own.

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::state::{self, HubCommand, HubHandle};
use crate::signaling::ClientMessage;

/// Run the hub until the process is stopped.
pub async fn run(addr: &str) -> Result<()> {
    let hub = state::spawn();

    let app = Router::new()
        .route("/api/rooms", get(rooms))
        .route("/ws", get(upgrade))
        .with_state(hub);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(event = "hub_listening", %addr, "Signaling hub running");

    axum::serve(listener, app).await.context("Hub server error")
}

/// `GET /api/rooms`: room id to member ids, for pre-join validation.
async fn rooms(State(hub): State<HubHandle>) -> impl IntoResponse {
    Json(hub.rooms().await)
}

async fn upgrade(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let member_id = Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.send(HubCommand::Register {
        member_id: member_id.clone(),
        tx,
    });

    // Write pump: hub → socket.
    let writer_id = member_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(event = "encode_failure", member = %writer_id, %e, "Dropping unencodable message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Read loop: socket → hub.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => hub.send(HubCommand::Incoming {
                    member_id: member_id.clone(),
                    msg,
                }),
                Err(e) => {
                    warn!(event = "bad_frame", member = %member_id, %e, "Ignoring unparseable frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary/ping/pong carry nothing at this layer
            Err(e) => {
                debug!(event = "socket_error", member = %member_id, %e, "Socket read error");
                break;
            }
        }
    }

    hub.send(HubCommand::Disconnect {
        member_id: member_id.clone(),
    });
    writer.abort();
    debug!(event = "socket_closed", member = %member_id, "Connection closed");
}
