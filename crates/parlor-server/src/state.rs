//! Shared server state handed to every handler.

use std::sync::Arc;

use parlor_engine::chat::ChatRunner;
use parlor_engine::client::ClientFactory;
use parlor_engine::interrupt::InterruptController;
use parlor_engine::permission::PermissionBroker;
use parlor_engine::registry::TaskRegistry;
use parlor_engine::supervisor::SessionSupervisor;
use parlor_store::SessionStore;

/// Everything the HTTP and WebSocket layers need, wired once at startup.
pub struct ServerContext {
    /// Session/message persistence.
    pub store: Arc<SessionStore>,
    /// Per-conversation client owner.
    pub supervisor: Arc<SessionSupervisor>,
    /// Per-conversation round task tracking.
    pub registry: Arc<TaskRegistry>,
    /// Pending permission prompt correlation.
    pub broker: Arc<PermissionBroker>,
    /// Interrupt coordination.
    pub interrupts: Arc<InterruptController>,
    /// Turn submission.
    pub runner: Arc<ChatRunner>,
}

impl ServerContext {
    /// Wire the engine registries over a store and client factory.
    pub fn new(store: Arc<SessionStore>, factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        let broker = Arc::new(PermissionBroker::new());
        let supervisor = Arc::new(SessionSupervisor::new(
            Arc::clone(&store),
            factory,
            Arc::clone(&broker),
        ));
        let registry = Arc::new(TaskRegistry::new());
        let interrupts = Arc::new(InterruptController::new(
            Arc::clone(&supervisor),
            Arc::clone(&registry),
            Arc::clone(&store),
        ));
        let runner = Arc::new(ChatRunner::new(
            Arc::clone(&supervisor),
            Arc::clone(&registry),
            Arc::clone(&store),
        ));
        Arc::new(Self { store, supervisor, registry, broker, interrupts, runner })
    }

    /// Cancel all live rounds and drop pending permission prompts.
    /// Shutdown path.
    pub fn shutdown(&self) {
        self.registry.cancel_all();
        self.broker.cancel_all();
    }
}
