//! Scripted doubles shared by the engine's test modules.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parlor_core::envelope::Outbound;
use parlor_core::event::{AgentEvent, DeltaEvent, MessageContent, ResultPayload};
use parlor_core::message::ContentBlock;
use serde_json::json;
use tokio::sync::Notify;

use crate::client::{ClientConfig, ClientFactory, ExecutionClient};
use crate::errors::{EngineError, Result};
use crate::outbound::EventSink;

/// An execution client that replays a scripted event sequence.
pub(crate) struct ScriptedClient {
    events: std::sync::Mutex<VecDeque<AgentEvent>>,
    queries: std::sync::Mutex<Vec<String>>,
    connected: AtomicBool,
    disconnected: AtomicBool,
    interrupt_count: AtomicUsize,
    fail_connect: AtomicBool,
    fail_interrupt: AtomicBool,
    hang_when_empty: AtomicBool,
    wakeup: Notify,
}

impl ScriptedClient {
    fn new(events: Vec<AgentEvent>, hang_when_empty: bool) -> Arc<Self> {
        Arc::new(Self {
            events: std::sync::Mutex::new(events.into()),
            queries: std::sync::Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            interrupt_count: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_interrupt: AtomicBool::new(false),
            hang_when_empty: AtomicBool::new(hang_when_empty),
            wakeup: Notify::new(),
        })
    }

    /// A client with no scripted events; `next_event` pends forever.
    pub fn idle() -> Arc<Self> {
        Self::new(Vec::new(), true)
    }

    /// A client replaying `events`, then ending its stream.
    pub fn with_events(events: Vec<AgentEvent>) -> Arc<Self> {
        Self::new(events, false)
    }

    /// A client whose `connect` fails.
    pub fn failing_connect() -> Arc<Self> {
        let client = Self::new(Vec::new(), true);
        client.fail_connect.store(true, Ordering::SeqCst);
        client
    }

    /// Make subsequent `interrupt` calls fail.
    pub fn fail_interrupts(&self) {
        self.fail_interrupt.store(true, Ordering::SeqCst);
    }

    /// Pend (instead of ending the stream) once events run out.
    pub fn hang_when_empty(&self) {
        self.hang_when_empty.store(true, Ordering::SeqCst);
    }

    /// Append events and wake a pending `next_event`.
    pub fn extend_events(&self, events: Vec<AgentEvent>) {
        self.events.lock().unwrap().extend(events);
        self.wakeup.notify_waiters();
    }

    /// Queries received, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupt_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionClient for ScriptedClient {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(EngineError::ClientBuild("connect refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        let _ = self.interrupt_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_interrupt.load(Ordering::SeqCst) {
            return Err(EngineError::Client("interrupt failed".into()));
        }
        Ok(())
    }

    async fn query(&self, text: &str) -> Result<()> {
        self.queries.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<AgentEvent>> {
        loop {
            // Register interest before checking, so an extend between the
            // check and the await cannot be missed.
            let notified = self.wakeup.notified();
            if let Some(event) = self.events.lock().unwrap().pop_front() {
                return Ok(Some(event));
            }
            if !self.hang_when_empty.load(Ordering::SeqCst) {
                return Ok(None);
            }
            notified.await;
        }
    }
}

/// Factory dispensing pre-built scripted clients in order.
pub(crate) struct ScriptedFactory {
    clients: std::sync::Mutex<VecDeque<Arc<ScriptedClient>>>,
    configs: std::sync::Mutex<Vec<ClientConfig>>,
    failure: Option<String>,
}

impl ScriptedFactory {
    pub fn with_clients(clients: Vec<Arc<ScriptedClient>>) -> Arc<Self> {
        Arc::new(Self {
            clients: std::sync::Mutex::new(clients.into()),
            configs: std::sync::Mutex::new(Vec::new()),
            failure: None,
        })
    }

    /// A factory whose every build fails.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            clients: std::sync::Mutex::new(VecDeque::new()),
            configs: std::sync::Mutex::new(Vec::new()),
            failure: Some(message.to_owned()),
        })
    }

    /// Number of successful builds.
    pub fn build_count(&self) -> usize {
        self.configs.lock().unwrap().len()
    }

    /// Configs passed to `build`, in order.
    pub fn configs(&self) -> Vec<ClientConfig> {
        self.configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    async fn build(&self, config: ClientConfig) -> Result<Arc<dyn ExecutionClient>> {
        if let Some(message) = &self.failure {
            return Err(EngineError::ClientBuild(message.clone()));
        }
        let client = self
            .clients
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::ClientBuild("no scripted client available".into()))?;
        self.configs.lock().unwrap().push(config);
        Ok(client)
    }
}

/// Sink that records every frame and wakes waiters.
pub(crate) struct RecordingSink {
    frames: std::sync::Mutex<Vec<Outbound>>,
    wakeup: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self { frames: std::sync::Mutex::new(Vec::new()), wakeup: Notify::new() }
    }

    pub fn frames(&self) -> Vec<Outbound> {
        self.frames.lock().unwrap().clone()
    }

    /// Wait until at least `n` frames have been recorded.
    pub async fn wait_for_frames(&self, n: usize) {
        loop {
            let notified = self.wakeup.notified();
            if self.frames.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, frame: Outbound) {
        self.frames.lock().unwrap().push(frame);
        self.wakeup.notify_waiters();
    }
}

/// Sink that discards everything.
pub(crate) struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn send(&self, _frame: Outbound) {}
}

/// A complete streamed round: init, one streamed text message, its
/// finalization, and a success result.
pub(crate) fn streamed_text_round(session_id: &str, text: &str) -> Vec<AgentEvent> {
    vec![
        AgentEvent::System {
            subtype: "init".into(),
            data: json!({"session_id": session_id, "model": "m"}),
        },
        AgentEvent::Stream {
            event: DeltaEvent::MessageStart { message: json!({"role": "assistant"}) },
            parent_tool_use_id: None,
        },
        AgentEvent::Stream {
            event: DeltaEvent::ContentBlockStart {
                index: 0,
                content_block: json!({"type": "text", "text": ""}),
            },
            parent_tool_use_id: None,
        },
        AgentEvent::Stream {
            event: DeltaEvent::ContentBlockDelta {
                index: 0,
                delta: json!({"type": "text_delta", "text": text}),
            },
            parent_tool_use_id: None,
        },
        AgentEvent::Stream {
            event: DeltaEvent::ContentBlockStop { index: 0 },
            parent_tool_use_id: None,
        },
        AgentEvent::Assistant {
            content: MessageContent::Blocks(vec![ContentBlock::Text { text: text.into() }]),
            model: Some("m".into()),
        },
        AgentEvent::Stream { event: DeltaEvent::MessageStop, parent_tool_use_id: None },
        AgentEvent::Result(ResultPayload {
            subtype: "success".into(),
            duration_ms: 100,
            duration_api_ms: 80,
            is_error: false,
            num_turns: 1,
            total_cost_usd: Some(0.001),
            usage: Some(json!({"input_tokens": 5, "output_tokens": 9})),
            result: Some(text.into()),
        }),
    ]
}
