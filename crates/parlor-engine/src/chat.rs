//! Chat runner — the per-turn task body.
//!
//! An inbound user turn becomes one round task: obtain (or lazily build) the
//! conversation's execution client, acquire the conversation mutex, send the
//! query, and drive the backend's event stream through a fresh
//! [`RoundProcessor`], forwarding each emitted message in order until the
//! terminal result. Failures are converted into error envelopes scoped to
//! the turn — the conversation itself survives.

use std::sync::Arc;

use parlor_core::envelope::ErrorEnvelope;
use parlor_core::options::ExecOptions;
use parlor_store::SessionStore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::ExecutionClient;
use crate::errors::Result;
use crate::outbound::EventSink;
use crate::registry::TaskRegistry;
use crate::round::RoundProcessor;
use crate::supervisor::SessionSupervisor;

/// Submits user turns as supervised round tasks.
pub struct ChatRunner {
    supervisor: Arc<SessionSupervisor>,
    registry: Arc<TaskRegistry>,
    store: Arc<SessionStore>,
}

impl ChatRunner {
    /// Create a runner over the shared registries.
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        registry: Arc<TaskRegistry>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self { supervisor, registry, store }
    }

    /// Submit one user turn. Any round still in flight for the conversation
    /// is superseded (cancelled before this one starts consuming).
    #[instrument(skip(self, content, sink))]
    pub fn submit_turn(
        &self,
        conversation_id: &str,
        content: String,
        round_id: Option<String>,
        sink: Arc<dyn EventSink>,
    ) {
        let round_id = round_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let supervisor = Arc::clone(&self.supervisor);
        let store = Arc::clone(&self.store);
        let conversation = conversation_id.to_owned();
        let round = round_id.clone();

        self.registry.submit(conversation_id, &round_id, async move {
            let result =
                run_round(&supervisor, &store, &conversation, content, round, Arc::clone(&sink))
                    .await;
            if let Err(e) = &result {
                sink.send(
                    ErrorEnvelope::new(e.error_type(), e.to_string(), Some(conversation.clone()))
                        .into(),
                )
                .await;
            }
            result
        });
    }
}

/// Drive one round to its terminal result.
async fn run_round(
    supervisor: &Arc<SessionSupervisor>,
    store: &Arc<SessionStore>,
    conversation_id: &str,
    content: String,
    round_id: String,
    sink: Arc<dyn EventSink>,
) -> Result<()> {
    let client = acquire_client(supervisor, store, conversation_id, Arc::clone(&sink)).await?;

    // Serialize backend access within the conversation; independent
    // conversations proceed concurrently.
    let lock = supervisor.conversation_lock(conversation_id);
    let _guard = lock.lock().await;

    info!(conversation_id, round_id, "processing turn");
    client.query(&content).await?;

    let mut processor = RoundProcessor::new(
        Arc::clone(store),
        Arc::clone(supervisor),
        conversation_id,
        content,
        Some(round_id),
    );

    loop {
        let Some(event) = client.next_event().await? else {
            warn!(conversation_id, "event stream ended without a terminal result");
            break;
        };
        for message in processor.process(event)? {
            sink.send(message.into()).await;
        }
        if processor.terminal().is_some() {
            break;
        }
    }

    info!(
        conversation_id,
        round_id = processor.round_id(),
        emitted = processor.emitted(),
        "turn complete"
    );
    Ok(())
}

/// Reuse the conversation's client, or build one from the stored record:
/// an existing backend session id resumes it, stored options are carried
/// over, and the supervisor binds the permission callback.
async fn acquire_client(
    supervisor: &Arc<SessionSupervisor>,
    store: &Arc<SessionStore>,
    conversation_id: &str,
    sink: Arc<dyn EventSink>,
) -> Result<Arc<dyn ExecutionClient>> {
    if let Some(client) = supervisor.get_client(conversation_id) {
        return Ok(client);
    }

    // Cold path: prefer the in-memory record (authoritative after a
    // reconfigure), fall back to the stored row for resumes across restarts.
    let (resume, options) = match supervisor.record(conversation_id) {
        Some(record) => (record.backend_session_id, record.options),
        None => match store.get_session(conversation_id) {
            Some(row) => {
                let options = serde_json::from_value(row.options).unwrap_or_else(|e| {
                    warn!(conversation_id, error = %e, "stored options undecodable, using defaults");
                    ExecOptions::default()
                });
                (row.backend_session_id, options)
            }
            None => (None, ExecOptions::default()),
        },
    };

    supervisor
        .create_or_resume(conversation_id, resume, options, sink)
        .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
