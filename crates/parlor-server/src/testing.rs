//! Test doubles for the server crate.

use std::sync::Arc;

use async_trait::async_trait;
use parlor_core::envelope::Outbound;
use parlor_engine::client::{ClientConfig, ClientFactory, ExecutionClient};
use parlor_engine::errors::{EngineError, Result};
use parlor_engine::outbound::EventSink;
use parlor_store::SessionStore;
use tokio::sync::Notify;

use crate::state::ServerContext;

/// A client factory whose builds always fail — enough for transport-level
/// tests, which never need a live backend.
pub(crate) struct StubFactory {
    message: String,
}

impl StubFactory {
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self { message: "no backend in tests".into() })
    }
}

#[async_trait]
impl ClientFactory for StubFactory {
    async fn build(&self, _config: ClientConfig) -> Result<Arc<dyn ExecutionClient>> {
        Err(EngineError::ClientBuild(self.message.clone()))
    }
}

/// Build a fully wired context over an in-memory store.
pub(crate) fn context(factory: Arc<StubFactory>) -> Arc<ServerContext> {
    let store = Arc::new(SessionStore::open(":memory:").unwrap());
    ServerContext::new(store, factory)
}

/// Sink recording frames for assertions.
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
