//! Per-connection WebSocket plumbing.
//!
//! Each connection gets an outbound mpsc channel drained by a writer task;
//! engine components deliver frames through [`WsSink`]. The read loop feeds
//! inbound frames to the dispatcher. On close, rounds started from this
//! connection are cancelled and their backends interrupted — their clients
//! would otherwise stream into the void.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use parlor_core::envelope::Outbound;
use parlor_engine::outbound::EventSink;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::ServerContext;
use crate::ws::dispatch;

/// Outbound frame buffer per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Delivers outbound frames into one connection's writer channel.
pub struct WsSink {
    connection_id: String,
    tx: mpsc::Sender<String>,
}

impl WsSink {
    /// Wrap a writer channel.
    pub fn new(connection_id: String, tx: mpsc::Sender<String>) -> Self {
        Self { connection_id, tx }
    }
}

#[async_trait]
impl EventSink for WsSink {
    async fn send(&self, frame: Outbound) {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "failed to serialize outbound frame");
                return;
            }
        };
        if self.tx.send(json).await.is_err() {
            debug!(connection_id = %self.connection_id, "connection gone, dropping frame");
        }
    }
}

/// Upgrade handler for `/v1/chat/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<ServerContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<ServerContext>) {
    let connection_id = format!("conn_{}", Uuid::now_v7());
    info!(connection_id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    // Writer task: drain the outbound channel into the socket
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(json) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!(connection_id = %writer_id, "websocket send failed, client disconnected");
                break;
            }
        }
    });

    let sink: Arc<dyn EventSink> = Arc::new(WsSink::new(connection_id.clone(), outbound_tx.clone()));
    // Conversations that started rounds on this connection, for close cleanup
    let conversations: Mutex<HashSet<String>> = Mutex::new(HashSet::new());

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!(connection_id, "client sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(connection_id, error = %e, "websocket read error");
                break;
            }
        };
        dispatch::dispatch(&ctx, &sink, &conversations, &text).await;
    }

    // Cleanup: cancel this connection's rounds and interrupt their backends
    let started: Vec<String> = conversations.lock().drain().collect();
    for conversation_id in started {
        if ctx.registry.is_active(&conversation_id) {
            info!(connection_id, conversation_id, "cancelling round on disconnect");
            let _ = ctx.registry.cancel(&conversation_id);
        }
        if let Some(client) = ctx.supervisor.get_client(&conversation_id) {
            if let Err(e) = client.interrupt().await {
                warn!(conversation_id, error = %e, "failed to interrupt backend on disconnect");
            }
        }
    }

    writer.abort();
    info!(connection_id, "websocket closed");
}
