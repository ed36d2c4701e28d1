//! Round processor — streaming reassembly state machine.
//!
//! One processor instance lives for exactly one user turn, owned by the task
//! processing that turn (the conversation mutex guarantees at most one is
//! active per conversation). It reassembles the backend's mixed event stream
//! into discrete, storable, client-deliverable messages:
//!
//! - discovers the backend session id exactly once per round from the first
//!   system event and attaches it to the conversation,
//! - persists the synthesized user turn exactly once,
//! - collapses stream deltas into one coherent assistant message boundary by
//!   re-labelling every delta with the id captured at `message_start` and
//!   swapping that id onto the finalized assistant message,
//! - suppresses delivery of deltas that belong to tool invocations,
//! - maintains the running parent pointer so each stored message references
//!   the message that logically precedes it.
//!
//! Message ids are deterministic within a round (UUIDv5 over round id and
//! emission counter), so feeding the same event sequence through a fresh
//! processor yields identical output — combined with the store's idempotent
//! upsert this makes round replay safe.

use std::sync::Arc;

use chrono::Utc;
use parlor_core::event::{AgentEvent, DeltaEvent, MessageContent};
use parlor_core::message::{BlockKind, ChatMessage, ContentBlock, MessageKind, round_message_id};
use parlor_store::SessionStore;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::supervisor::SessionSupervisor;

/// How the round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalSubtype {
    /// Backend reported success.
    Success,
    /// Backend reported any error subtype.
    Error,
}

/// Where the processor is within a streamed assistant message.
///
/// `message_start` opens a stream; the finalized assistant message may
/// arrive either before `message_stop` (stream still open) or after it
/// (`AwaitingFinal`), so the coalescing id is held until the swap happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamPhase {
    /// No open stream.
    Idle,
    /// Inside a streamed message.
    Streaming,
    /// Inside a tool-use block of a streamed message; deltas are suppressed.
    StreamingTool,
    /// Stream closed but its finalized assistant message has not arrived.
    AwaitingFinal,
}

/// One decomposed piece of a backend event.
enum Part {
    Whole { kind: MessageKind, block: Option<BlockKind>, payload: Value },
    Delta { event: DeltaEvent, payload: Value },
}

/// Per-turn reassembly state machine.
pub struct RoundProcessor {
    store: Arc<SessionStore>,
    supervisor: Arc<SessionSupervisor>,
    conversation_id: String,
    query: String,
    round_id: String,
    backend_session_id: Option<String>,
    parent_id: Option<String>,
    phase: StreamPhase,
    /// Id captured at `message_start`; becomes the finalized assistant
    /// message's id via an explicit swap.
    coalescing_id: Option<String>,
    /// Whether the open stream's finalization swap has happened.
    finalized: bool,
    user_saved: bool,
    emitted: u64,
    terminal: Option<TerminalSubtype>,
}

impl RoundProcessor {
    /// Start a round for one user turn. The round id is client-supplied or
    /// generated; the backend session id is seeded from the supervisor's
    /// mapping when the conversation already has one.
    pub fn new(
        store: Arc<SessionStore>,
        supervisor: Arc<SessionSupervisor>,
        conversation_id: impl Into<String>,
        query: impl Into<String>,
        round_id: Option<String>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let backend_session_id = supervisor.backend_session_id(&conversation_id);
        Self {
            store,
            supervisor,
            conversation_id,
            query: query.into(),
            round_id: round_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            backend_session_id,
            parent_id: None,
            phase: StreamPhase::Idle,
            coalescing_id: None,
            finalized: false,
            user_saved: false,
            emitted: 0,
            terminal: None,
        }
    }

    /// The round id (generated if the client supplied none).
    pub fn round_id(&self) -> &str {
        &self.round_id
    }

    /// Terminal subtype once a result event has been processed. The caller
    /// stops consuming the event stream when this is set.
    pub fn terminal(&self) -> Option<TerminalSubtype> {
        self.terminal
    }

    /// Number of messages emitted so far (deltas included).
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Current parent pointer.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Process one backend event into zero or more deliverable messages.
    ///
    /// Every non-delta message in the returned batch has already been
    /// persisted. Persistence failures are logged by the store and never
    /// abort the round.
    pub fn process(&mut self, event: AgentEvent) -> Result<Vec<ChatMessage>> {
        if let AgentEvent::Result(payload) = &event {
            self.terminal = Some(if payload.is_success() {
                TerminalSubtype::Success
            } else {
                TerminalSubtype::Error
            });
        }

        self.bind_session(&event)?;
        self.persist_user_turn();

        let mut out = Vec::new();
        for part in explode(event) {
            match part {
                Part::Delta { event: delta, payload } => {
                    if let Some(msg) = self.process_delta(&delta, payload)? {
                        out.push(msg);
                        self.emitted += 1;
                    }
                }
                Part::Whole { kind, block, payload } => {
                    let msg = self.process_whole(kind, block, payload);
                    out.push(msg);
                    self.emitted += 1;
                }
            }
        }
        Ok(out)
    }

    /// Discover the backend session id exactly once per round.
    fn bind_session(&mut self, event: &AgentEvent) -> Result<()> {
        if self.backend_session_id.is_some() {
            return Ok(());
        }
        if let Some(sid) = event.backend_session_id() {
            debug!(
                conversation_id = %self.conversation_id,
                backend_session_id = %sid,
                "discovered backend session"
            );
            self.backend_session_id = Some(sid.to_owned());
            self.supervisor
                .register_backend_session(&self.conversation_id, sid);
            return Ok(());
        }
        // A system event without a session id is tolerated (a later one may
        // carry it); anything else before discovery is a broken contract.
        if matches!(event, AgentEvent::System { .. }) {
            Ok(())
        } else {
            Err(EngineError::MissingSessionInit)
        }
    }

    /// Persist the user's own turn exactly once. Its message id is the round
    /// id, and it becomes the round's parent root.
    fn persist_user_turn(&mut self) {
        if self.user_saved {
            return;
        }
        let payload = to_payload(&AgentEvent::User {
            content: MessageContent::Blocks(vec![ContentBlock::Text { text: self.query.clone() }]),
            parent_tool_use_id: None,
        });
        let msg = ChatMessage {
            conversation_id: self.conversation_id.clone(),
            round_id: self.round_id.clone(),
            backend_session_id: self.backend_session_id.clone(),
            message_id: self.round_id.clone(),
            parent_id: None,
            kind: MessageKind::User,
            block: Some(BlockKind::Text),
            payload,
            timestamp: Utc::now(),
        };
        let _ = self.store.save_message(&msg);
        self.parent_id = Some(self.round_id.clone());
        self.user_saved = true;
    }

    fn process_delta(&mut self, delta: &DeltaEvent, payload: Value) -> Result<Option<ChatMessage>> {
        let message_id = if matches!(delta, DeltaEvent::MessageStart { .. }) {
            let id = self.next_id();
            self.phase = StreamPhase::Streaming;
            self.coalescing_id = Some(id.clone());
            self.finalized = false;
            id
        } else {
            if delta.requires_open_stream()
                && !matches!(self.phase, StreamPhase::Streaming | StreamPhase::StreamingTool)
            {
                return Err(EngineError::StreamDesync(
                    "content-block delta arrived with no open stream",
                ));
            }
            match &self.coalescing_id {
                Some(id) => id.clone(),
                // A message_stop outside any stream; tolerated
                None => self.next_id(),
            }
        };

        if delta.starts_tool_use() {
            self.phase = StreamPhase::StreamingTool;
        }
        if matches!(delta, DeltaEvent::ContentBlockStop { .. })
            && self.phase == StreamPhase::StreamingTool
        {
            self.phase = StreamPhase::Streaming;
        }
        let suppress = self.phase == StreamPhase::StreamingTool;

        if matches!(delta, DeltaEvent::MessageStop) {
            if self.finalized {
                self.phase = StreamPhase::Idle;
                self.coalescing_id = None;
            } else {
                // The finalized assistant message has not arrived yet; hold
                // the coalescing id for the pending swap.
                self.phase = StreamPhase::AwaitingFinal;
            }
        }

        if suppress {
            return Ok(None);
        }
        Ok(Some(self.make_message(MessageKind::Stream, None, payload, message_id)))
    }

    fn process_whole(
        &mut self,
        kind: MessageKind,
        block: Option<BlockKind>,
        payload: Value,
    ) -> ChatMessage {
        let mut message_id = self.next_id();

        // Finalization: the streamed-delta id becomes the id of the
        // persisted assistant message.
        if kind == MessageKind::Assistant && self.phase != StreamPhase::Idle {
            if let Some(coalescing) = self.coalescing_id.as_mut() {
                std::mem::swap(coalescing, &mut message_id);
                self.finalized = true;
                if self.phase == StreamPhase::AwaitingFinal {
                    self.phase = StreamPhase::Idle;
                    self.coalescing_id = None;
                }
            }
        }

        let msg = self.make_message(kind, block, payload, message_id);
        let _ = self.store.save_message(&msg);
        self.parent_id = Some(msg.message_id.clone());
        msg
    }

    fn make_message(
        &self,
        kind: MessageKind,
        block: Option<BlockKind>,
        payload: Value,
        message_id: String,
    ) -> ChatMessage {
        ChatMessage {
            conversation_id: self.conversation_id.clone(),
            round_id: self.round_id.clone(),
            backend_session_id: self.backend_session_id.clone(),
            message_id,
            parent_id: self.parent_id.clone(),
            kind,
            block,
            payload,
            timestamp: Utc::now(),
        }
    }

    fn next_id(&self) -> String {
        round_message_id(&self.round_id, self.emitted)
    }
}

/// Decompose a backend event into per-message parts: assistant/user events
/// with N content blocks split into N one-block messages, everything else
/// passes through whole.
fn explode(event: AgentEvent) -> Vec<Part> {
    match event {
        AgentEvent::System { .. } => {
            let payload = to_payload(&event);
            vec![Part::Whole { kind: MessageKind::System, block: None, payload }]
        }
        AgentEvent::Result(_) => {
            let payload = to_payload(&event);
            vec![Part::Whole { kind: MessageKind::Result, block: None, payload }]
        }
        AgentEvent::Stream { event: delta, parent_tool_use_id } => {
            let payload = to_payload(&AgentEvent::Stream {
                event: delta.clone(),
                parent_tool_use_id,
            });
            vec![Part::Delta { event: delta, payload }]
        }
        AgentEvent::User { content, parent_tool_use_id } => content
            .into_blocks()
            .into_iter()
            .map(|block| {
                let kind_block = block.kind();
                let payload = to_payload(&AgentEvent::User {
                    content: MessageContent::Blocks(vec![block]),
                    parent_tool_use_id: parent_tool_use_id.clone(),
                });
                Part::Whole { kind: MessageKind::User, block: Some(kind_block), payload }
            })
            .collect(),
        AgentEvent::Assistant { content, model } => content
            .into_blocks()
            .into_iter()
            .map(|block| {
                let kind_block = block.kind();
                let payload = to_payload(&AgentEvent::Assistant {
                    content: MessageContent::Blocks(vec![block]),
                    model: model.clone(),
                });
                Part::Whole { kind: MessageKind::Assistant, block: Some(kind_block), payload }
            })
            .collect(),
    }
}

/// Serialize an event into a message payload. These are our own types;
/// serialization cannot realistically fail, and a null payload is preferable
/// to aborting the round.
fn to_payload(event: &AgentEvent) -> Value {
    serde_json::to_value(event).unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize event payload");
        Value::Null
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
