//! Inbound frame routing.
//!
//! Every inbound frame carries a `type` discriminant and is routed to the
//! matching coordinator. Validation failures are reported back on the same
//! connection and the conversation continues — nothing here mutates state
//! for malformed input.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use parlor_core::envelope::{ErrorEnvelope, EventEnvelope, Inbound, InboundError};
use parlor_engine::outbound::EventSink;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::state::ServerContext;

/// Parse and route one inbound frame.
pub async fn dispatch(
    ctx: &Arc<ServerContext>,
    sink: &Arc<dyn EventSink>,
    conversations: &Mutex<HashSet<String>>,
    raw: &str,
) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "inbound frame is not valid JSON");
            sink.send(
                ErrorEnvelope::new("invalid_json", format!("malformed frame: {e}"), None).into(),
            )
            .await;
            return;
        }
    };

    let frame = match Inbound::from_value(&value) {
        Ok(frame) => frame,
        Err(InboundError::UnknownType(tag)) => {
            sink.send(
                ErrorEnvelope::new(
                    "unknown_message_type",
                    format!("unsupported message type `{tag}`"),
                    None,
                )
                .into(),
            )
            .await;
            return;
        }
        Err(e @ (InboundError::MissingType | InboundError::Invalid { .. })) => {
            sink.send(ErrorEnvelope::new("validation_error", e.to_string(), None).into()).await;
            return;
        }
    };

    match frame {
        Inbound::Chat { conversation_id, content, round_id } => {
            if conversation_id.is_empty() {
                sink.send(
                    ErrorEnvelope::new(
                        "validation_error",
                        "conversation_id is required for chat messages",
                        None,
                    )
                    .into(),
                )
                .await;
                return;
            }
            debug!(conversation_id, "chat frame received");
            let _ = conversations.lock().insert(conversation_id.clone());
            ctx.runner.submit_turn(&conversation_id, content, round_id, Arc::clone(sink));
        }
        Inbound::Interrupt { conversation_id } => {
            if conversation_id.is_empty() {
                sink.send(
                    ErrorEnvelope::new(
                        "validation_error",
                        "conversation_id is required for interrupts",
                        None,
                    )
                    .into(),
                )
                .await;
                return;
            }
            // Detached: must not block other conversations' frames
            let interrupts = Arc::clone(&ctx.interrupts);
            let sink = Arc::clone(sink);
            let _ = tokio::spawn(async move {
                interrupts.interrupt(&conversation_id, sink).await;
            });
        }
        Inbound::PermissionResponse(response) => {
            let _ = ctx.broker.resolve(response);
        }
        Inbound::Ping { conversation_id } => {
            let conversation_id = conversation_id.unwrap_or_default();
            let backend_session_id = if conversation_id.is_empty() {
                None
            } else {
                ctx.supervisor.backend_session_id(&conversation_id)
            };
            sink.send(
                EventEnvelope::new("pong", conversation_id, backend_session_id, json!({})).into(),
            )
            .await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
