//! Interrupt controller — cooperative-then-forced cancellation of an
//! in-flight round.
//!
//! An interrupt signals the backend first, then gives the round a bounded
//! window to finish on its own. Only when the window expires is the task
//! cancelled, and only a forced unwind produces the synthetic terminal
//! "interrupted" message. Interrupting an idle conversation is a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parlor_core::event::{AgentEvent, ResultPayload};
use parlor_core::message::{ChatMessage, MESSAGE_ID_NS, MessageKind};
use parlor_store::SessionStore;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::outbound::EventSink;
use crate::registry::TaskRegistry;
use crate::supervisor::SessionSupervisor;

/// Fixed window for the round to finish naturally after the backend
/// interrupt is signalled. Not configurable per call.
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(10);

/// Reason recorded on the synthetic terminal message.
const INTERRUPTED_REASON: &str = "Interrupted by user";

/// Coordinates interrupts across the supervisor and task registry.
pub struct InterruptController {
    supervisor: Arc<SessionSupervisor>,
    registry: Arc<TaskRegistry>,
    store: Arc<SessionStore>,
}

impl InterruptController {
    /// Create a controller over the shared registries.
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        registry: Arc<TaskRegistry>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self { supervisor, registry, store }
    }

    /// Interrupt a conversation's in-flight round.
    ///
    /// Runs detached from the inbound message loop — callers spawn it so
    /// other conversations' traffic keeps flowing. Safe to invoke on an idle
    /// conversation.
    #[instrument(skip(self, sink))]
    pub async fn interrupt(&self, conversation_id: &str, sink: Arc<dyn EventSink>) {
        let Some(client) = self.supervisor.get_client(conversation_id) else {
            warn!(conversation_id, "interrupt requested but no client exists");
            return;
        };

        if let Err(e) = client.interrupt().await {
            warn!(conversation_id, error = %e, "backend interrupt call failed");
            return;
        }
        info!(conversation_id, "backend interrupt signalled");

        if !self.registry.is_active(conversation_id) {
            debug!(conversation_id, "no round in flight, nothing to wait for");
            return;
        }

        // Capture the round id before the entry can disappear
        let round_id = self.registry.active_round_id(conversation_id);

        if self.registry.wait_idle(conversation_id, INTERRUPT_GRACE).await {
            debug!(conversation_id, "round finished naturally after interrupt");
            return;
        }

        info!(conversation_id, "round still running after grace window, cancelling");
        let _ = self.registry.cancel(conversation_id);
        self.registry.wait_unwound(conversation_id).await;

        let message = self.interrupted_message(conversation_id, round_id);
        let _ = self.store.save_message(&message);
        sink.send(message.into()).await;
        info!(conversation_id, "round interrupted");
    }

    /// Synthesize the terminal result for a forcibly cancelled round:
    /// zero-valued usage and cost, fixed human-readable reason. The message
    /// id is deterministic per round so a duplicated forced path collapses
    /// in the idempotent store.
    fn interrupted_message(
        &self,
        conversation_id: &str,
        round_id: Option<String>,
    ) -> ChatMessage {
        let round_id = round_id
            .or_else(|| self.store.latest_round_id(conversation_id))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let payload = AgentEvent::Result(ResultPayload {
            subtype: "interrupted".into(),
            duration_ms: 0,
            duration_api_ms: 0,
            is_error: true,
            num_turns: 0,
            total_cost_usd: Some(0.0),
            usage: Some(json!({"input_tokens": 0, "output_tokens": 0})),
            result: Some(INTERRUPTED_REASON.into()),
        });
        ChatMessage {
            conversation_id: conversation_id.to_owned(),
            round_id: round_id.clone(),
            backend_session_id: self.supervisor.backend_session_id(conversation_id),
            message_id: Uuid::new_v5(&MESSAGE_ID_NS, format!("{round_id}/interrupted").as_bytes())
                .to_string(),
            parent_id: None,
            kind: MessageKind::Result,
            block: None,
            payload: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result as EngineResult;
    use crate::permission::PermissionBroker;
    use crate::testing::{NullSink, RecordingSink, ScriptedClient, ScriptedFactory};
    use parlor_core::envelope::Outbound;
    use parlor_core::options::ExecOptions;

    struct Fixture {
        store: Arc<SessionStore>,
        supervisor: Arc<SessionSupervisor>,
        registry: Arc<TaskRegistry>,
        controller: InterruptController,
        client: Arc<ScriptedClient>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SessionStore::open(":memory:").unwrap());
        let _ = store.upsert_session("conv_1", None, None, None);
        let client = ScriptedClient::idle();
        let factory = ScriptedFactory::with_clients(vec![Arc::clone(&client)]);
        let supervisor = Arc::new(SessionSupervisor::new(
            Arc::clone(&store),
            factory,
            Arc::new(PermissionBroker::new()),
        ));
        let _ = supervisor
            .create_or_resume("conv_1", None, ExecOptions::default(), Arc::new(NullSink))
            .await
            .unwrap();
        let registry = Arc::new(TaskRegistry::new());
        let controller = InterruptController::new(
            Arc::clone(&supervisor),
            Arc::clone(&registry),
            Arc::clone(&store),
        );
        Fixture { store, supervisor, registry, controller, client }
    }

    /// A round that never finishes on its own.
    fn stuck_round() -> impl std::future::Future<Output = EngineResult<()>> {
        async {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn interrupt_idle_conversation_is_noop() {
        let fx = fixture().await;
        let sink = Arc::new(RecordingSink::new());

        fx.controller.interrupt("conv_1", sink.clone()).await;

        assert_eq!(fx.client.interrupt_count(), 1);
        assert!(sink.frames().is_empty());
        assert!(fx.store.messages_for_conversation("conv_1").is_empty());
    }

    #[tokio::test]
    async fn interrupt_without_client_is_noop() {
        let fx = fixture().await;
        fx.supervisor.remove("conv_1");
        let sink = Arc::new(RecordingSink::new());

        fx.controller.interrupt("conv_1", sink.clone()).await;
        assert_eq!(fx.client.interrupt_count(), 0);
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn failed_backend_interrupt_stops_early() {
        let fx = fixture().await;
        fx.client.fail_interrupts();
        fx.registry.submit("conv_1", "r1", stuck_round());
        let sink = Arc::new(RecordingSink::new());

        fx.controller.interrupt("conv_1", sink.clone()).await;

        // No synthetic message and the round was left alone
        assert!(sink.frames().is_empty());
        assert!(fx.registry.is_active("conv_1"));
        let _ = fx.registry.cancel("conv_1");
    }

    #[tokio::test(start_paused = true)]
    async fn natural_finish_within_grace_produces_no_synthetic_message() {
        let fx = fixture().await;
        // Round that finishes shortly after the interrupt lands
        fx.registry.submit("conv_1", "r1", async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        });
        let sink = Arc::new(RecordingSink::new());

        fx.controller.interrupt("conv_1", sink.clone()).await;

        assert!(sink.frames().is_empty());
        assert!(fx.store.messages_for_conversation("conv_1").is_empty());
        assert!(!fx.registry.is_active("conv_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_cancellation_synthesizes_exactly_one_interrupted_result() {
        let fx = fixture().await;
        fx.registry.submit("conv_1", "r1", stuck_round());
        let sink = Arc::new(RecordingSink::new());

        fx.controller.interrupt("conv_1", sink.clone()).await;

        // Delivered to the transport
        let frames = sink.frames();
        assert_eq!(frames.len(), 1);
        let Outbound::Message(msg) = &frames[0] else {
            panic!("expected message frame, got {frames:?}");
        };
        assert_eq!(msg.kind, MessageKind::Result);
        assert_eq!(msg.round_id, "r1");
        assert_eq!(msg.payload["subtype"], "interrupted");
        assert_eq!(msg.payload["total_cost_usd"], 0.0);
        assert_eq!(msg.payload["usage"]["output_tokens"], 0);
        assert_eq!(msg.payload["result"], INTERRUPTED_REASON);

        // Persisted exactly once
        let stored = fx.store.messages_for_conversation("conv_1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_id, msg.message_id);

        assert!(!fx.registry.is_active("conv_1"));
    }

    #[tokio::test(start_paused = true)]
    async fn double_interrupt_collapses_to_one_synthetic_message() {
        let fx = fixture().await;
        fx.registry.submit("conv_1", "r1", stuck_round());
        let sink = Arc::new(RecordingSink::new());

        fx.controller.interrupt("conv_1", sink.clone()).await;
        // Second interrupt: round is gone, so this is a no-op
        fx.controller.interrupt("conv_1", sink.clone()).await;

        assert_eq!(fx.store.messages_for_conversation("conv_1").len(), 1);
    }
}
