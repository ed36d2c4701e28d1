//! Session supervisor — owns one execution client and one mutex per
//! conversation.
//!
//! All conversation-scoped mutable state (client handles, per-conversation
//! locks, conversation records, and the conversation↔backend-session id
//! maps) lives behind this one owner. Readers must treat absence as "must
//! recreate", never as an error: entries disappear when a session is
//! deleted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parlor_core::options::ExecOptions;
use parlor_store::SessionStore;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClientConfig, ClientFactory, ExecutionClient, PermissionCallback, PermissionFuture};
use crate::errors::Result;
use crate::outbound::EventSink;
use crate::permission::PermissionBroker;

/// Per-conversation bookkeeping. The in-memory record is authoritative for
/// the life of the process; storage mirrors it best-effort.
#[derive(Clone, Debug)]
pub struct ConversationRecord {
    /// Backend session id, `None` until the first round discovers it.
    pub backend_session_id: Option<String>,
    /// Execution options used when (re)building the client.
    pub options: ExecOptions,
    /// Last time the conversation was touched.
    pub last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<String, Arc<dyn ExecutionClient>>,
    locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    records: HashMap<String, ConversationRecord>,
    /// backend session id → conversation id (reverse of the record field).
    session_index: HashMap<String, String>,
}

/// Creates, resumes, reconfigures, and tears down execution clients, one per
/// conversation.
pub struct SessionSupervisor {
    /// Shared with permission callbacks, which look up the backend session
    /// id at prompt time.
    inner: Arc<Mutex<Inner>>,
    store: Arc<SessionStore>,
    factory: Arc<dyn ClientFactory>,
    broker: Arc<PermissionBroker>,
}

impl SessionSupervisor {
    /// Create a supervisor over the given store, client factory, and broker.
    pub fn new(
        store: Arc<SessionStore>,
        factory: Arc<dyn ClientFactory>,
        broker: Arc<PermissionBroker>,
    ) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), store, factory, broker }
    }

    /// Existing client for a conversation. Touches last activity; no other
    /// side effects.
    pub fn get_client(&self, conversation_id: &str) -> Option<Arc<dyn ExecutionClient>> {
        let mut inner = self.inner.lock();
        let client = inner.clients.get(conversation_id).cloned();
        if client.is_some() {
            if let Some(record) = inner.records.get_mut(conversation_id) {
                record.last_activity = Utc::now();
            }
        }
        client
    }

    /// The conversation's mutex, created on first use. Serializes all
    /// backend client access within one conversation.
    pub fn conversation_lock(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inner = self.inner.lock();
        Arc::clone(
            inner
                .locks
                .entry(conversation_id.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Return the existing client unchanged, or build, connect, and register
    /// a new one. `backend_session_id` sets the resume marker; the permission
    /// callback is bound to the conversation and the given transport.
    ///
    /// Construction/connect failures propagate — the round task converts
    /// them into a user-visible error for that turn only.
    #[instrument(skip(self, options, sink))]
    pub async fn create_or_resume(
        &self,
        conversation_id: &str,
        backend_session_id: Option<String>,
        options: ExecOptions,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn ExecutionClient>> {
        if let Some(existing) = self.get_client(conversation_id) {
            debug!(conversation_id, "reusing existing client");
            return Ok(existing);
        }

        if let Some(sid) = &backend_session_id {
            info!(conversation_id, backend_session_id = %sid, "resuming backend session");
        }

        let config = ClientConfig {
            conversation_id: conversation_id.to_owned(),
            options: options.clone(),
            resume: backend_session_id.clone(),
            permission: self.permission_callback(conversation_id, sink),
        };
        let client = self.factory.build(config).await?;
        client.connect().await?;

        let raced = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.clients.get(conversation_id).cloned() {
                Some(existing)
            } else {
                let _ = inner
                    .clients
                    .insert(conversation_id.to_owned(), Arc::clone(&client));
                let _ = inner
                    .locks
                    .entry(conversation_id.to_owned())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
                let record = inner
                    .records
                    .entry(conversation_id.to_owned())
                    .or_insert_with(|| ConversationRecord {
                        backend_session_id: None,
                        options: options.clone(),
                        last_activity: Utc::now(),
                    });
                if let Some(sid) = &backend_session_id {
                    record.backend_session_id = Some(sid.clone());
                }
                record.last_activity = Utc::now();
                if let Some(sid) = &backend_session_id {
                    let _ = inner
                        .session_index
                        .insert(sid.clone(), conversation_id.to_owned());
                }
                None
            }
        };
        if let Some(existing) = raced {
            // Another task registered a client while ours was connecting.
            warn!(conversation_id, "concurrent client creation, discarding the later one");
            if let Err(e) = client.disconnect().await {
                warn!(conversation_id, error = %e, "failed to disconnect surplus client");
            }
            return Ok(existing);
        }

        // Mirror the session record to storage; failure is logged by the
        // store and the in-memory record stays authoritative.
        let options_blob = serde_json::to_value(&options).unwrap_or(Value::Null);
        let _ = self.store.upsert_session(
            conversation_id,
            backend_session_id.as_deref(),
            None,
            Some(&options_blob),
        );

        info!(conversation_id, "execution client ready");
        Ok(client)
    }

    /// Apply an options patch to a conversation.
    ///
    /// With no live client this succeeds trivially (the patch takes effect
    /// when the next turn builds a client). With a live client it waits for
    /// the conversation mutex, disconnects and discards the client, and
    /// leaves the slot empty for lazy rebuild with the merged options.
    /// Never refuses — "busy" is realized as waiting on the mutex.
    #[instrument(skip(self, patch))]
    pub async fn reconfigure(&self, conversation_id: &str, patch: &Value) -> bool {
        let has_client = self.inner.lock().clients.contains_key(conversation_id);

        if has_client {
            let lock = self.conversation_lock(conversation_id);
            let _guard = lock.lock().await;

            let old = self.inner.lock().clients.remove(conversation_id);
            if let Some(old) = old {
                if let Err(e) = old.disconnect().await {
                    warn!(conversation_id, error = %e, "failed to disconnect old client");
                }
                info!(conversation_id, "old client disconnected for reconfigure");
            }
        }

        let merged = {
            let mut inner = self.inner.lock();
            let record = inner
                .records
                .entry(conversation_id.to_owned())
                .or_insert_with(|| ConversationRecord {
                    backend_session_id: None,
                    options: ExecOptions::default(),
                    last_activity: Utc::now(),
                });
            record.options = record.options.merged_with(patch);
            record.last_activity = Utc::now();
            serde_json::to_value(&record.options).unwrap_or(Value::Null)
        };

        // Store failure is logged, not propagated: in-memory options already
        // reflect the change and the next client build uses them.
        let _ = self
            .store
            .upsert_session(conversation_id, None, None, Some(&merged));

        info!(conversation_id, "conversation options updated, client reset");
        true
    }

    /// Establish the bidirectional conversation↔backend-session mapping and
    /// mirror it to storage. Storage failure is logged, not propagated.
    pub fn register_backend_session(&self, conversation_id: &str, backend_session_id: &str) {
        {
            let mut inner = self.inner.lock();
            let record = inner
                .records
                .entry(conversation_id.to_owned())
                .or_insert_with(|| ConversationRecord {
                    backend_session_id: None,
                    options: ExecOptions::default(),
                    last_activity: Utc::now(),
                });
            record.backend_session_id = Some(backend_session_id.to_owned());
            let _ = inner
                .session_index
                .insert(backend_session_id.to_owned(), conversation_id.to_owned());
        }
        info!(conversation_id, backend_session_id, "registered backend session mapping");
        let _ = self
            .store
            .upsert_session(conversation_id, Some(backend_session_id), None, None);
    }

    /// Backend session id mapped to a conversation, if discovered.
    pub fn backend_session_id(&self, conversation_id: &str) -> Option<String> {
        self.inner
            .lock()
            .records
            .get(conversation_id)
            .and_then(|r| r.backend_session_id.clone())
    }

    /// Conversation owning a backend session id.
    pub fn conversation_for_session(&self, backend_session_id: &str) -> Option<String> {
        self.inner.lock().session_index.get(backend_session_id).cloned()
    }

    /// Snapshot of a conversation's record.
    pub fn record(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.inner.lock().records.get(conversation_id).cloned()
    }

    /// Evict client, lock, record, and id-mapping entries. Idempotent.
    /// An in-flight round keeps its own client handle alive until it
    /// unwinds; callers interrupt first in practice.
    pub fn remove(&self, conversation_id: &str) {
        let mut inner = self.inner.lock();
        let _ = inner.clients.remove(conversation_id);
        let _ = inner.locks.remove(conversation_id);
        if let Some(record) = inner.records.remove(conversation_id) {
            if let Some(sid) = record.backend_session_id {
                let _ = inner.session_index.remove(&sid);
            }
        }
        debug!(conversation_id, "conversation evicted");
    }

    /// Number of live clients.
    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Build the permission callback bound to one conversation and one
    /// transport. The backend session id is looked up at call time, so
    /// prompts raised after session discovery carry it.
    fn permission_callback(
        &self,
        conversation_id: &str,
        sink: Arc<dyn EventSink>,
    ) -> Arc<dyn PermissionCallback> {
        let inner = Arc::clone(&self.inner);
        let broker = Arc::clone(&self.broker);
        let conversation_id = conversation_id.to_owned();
        Arc::new(move |tool_name: String, tool_input: Value| -> PermissionFuture {
            let broker = Arc::clone(&broker);
            let sink = Arc::clone(&sink);
            let conversation_id = conversation_id.clone();
            let backend_session_id = inner
                .lock()
                .records
                .get(&conversation_id)
                .and_then(|r| r.backend_session_id.clone());
            Box::pin(async move {
                broker
                    .request(&*sink, &conversation_id, backend_session_id, &tool_name, tool_input)
                    .await
            })
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PermissionDecision;
    use crate::testing::{NullSink, RecordingSink, ScriptedClient, ScriptedFactory};
    use assert_matches::assert_matches;
    use parlor_core::envelope::{Outbound, PermissionResponse, PermissionVerdict};
    use serde_json::json;

    fn supervisor_with(factory: Arc<ScriptedFactory>) -> Arc<SessionSupervisor> {
        let store = Arc::new(SessionStore::open(":memory:").unwrap());
        Arc::new(SessionSupervisor::new(
            store,
            factory,
            Arc::new(PermissionBroker::new()),
        ))
    }

    #[tokio::test]
    async fn create_then_reuse_same_client() {
        let factory = ScriptedFactory::with_clients(vec![ScriptedClient::idle()]);
        let supervisor = supervisor_with(Arc::clone(&factory));

        let first = supervisor
            .create_or_resume("conv_1", None, ExecOptions::default(), Arc::new(NullSink))
            .await
            .unwrap();
        let second = supervisor
            .create_or_resume("conv_1", None, ExecOptions::default(), Arc::new(NullSink))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.build_count(), 1);
        assert_eq!(supervisor.client_count(), 1);
    }

    #[tokio::test]
    async fn connect_is_called_and_resume_marker_set() {
        let client = ScriptedClient::idle();
        let factory = ScriptedFactory::with_clients(vec![Arc::clone(&client)]);
        let supervisor = supervisor_with(Arc::clone(&factory));

        let _ = supervisor
            .create_or_resume(
                "conv_1",
                Some("sess_9".into()),
                ExecOptions::default(),
                Arc::new(NullSink),
            )
            .await
            .unwrap();

        assert!(client.connected());
        let configs = factory.configs();
        assert_eq!(configs[0].resume.as_deref(), Some("sess_9"));
        assert_eq!(configs[0].conversation_id, "conv_1");
        // Resume marker establishes the id mapping
        assert_eq!(supervisor.backend_session_id("conv_1").as_deref(), Some("sess_9"));
        assert_eq!(
            supervisor.conversation_for_session("sess_9").as_deref(),
            Some("conv_1")
        );
    }

    #[tokio::test]
    async fn connect_failure_propagates_and_registers_nothing() {
        let client = ScriptedClient::failing_connect();
        let factory = ScriptedFactory::with_clients(vec![client]);
        let supervisor = supervisor_with(factory);

        let err = supervisor
            .create_or_resume("conv_1", None, ExecOptions::default(), Arc::new(NullSink))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("connect refused"));
        assert_eq!(supervisor.client_count(), 0);
    }

    #[tokio::test]
    async fn reconfigure_without_client_succeeds_trivially() {
        let factory = ScriptedFactory::with_clients(vec![]);
        let supervisor = supervisor_with(factory);

        assert!(supervisor.reconfigure("conv_1", &json!({"model": "m2"})).await);
        let record = supervisor.record("conv_1").unwrap();
        assert_eq!(record.options.model.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn reconfigure_disconnects_old_client_and_merges_options() {
        let client = ScriptedClient::idle();
        let factory = ScriptedFactory::with_clients(vec![
            Arc::clone(&client),
            ScriptedClient::idle(),
        ]);
        let supervisor = supervisor_with(Arc::clone(&factory));

        let options = ExecOptions { model: Some("m1".into()), ..Default::default() };
        let _ = supervisor
            .create_or_resume("conv_1", None, options, Arc::new(NullSink))
            .await
            .unwrap();

        assert!(supervisor.reconfigure("conv_1", &json!({"model": "m2", "maxTurns": 3})).await);
        assert!(client.disconnected());
        // Client slot is empty until the next turn rebuilds lazily
        assert!(supervisor.get_client("conv_1").is_none());

        let record = supervisor.record("conv_1").unwrap();
        assert_eq!(record.options.model.as_deref(), Some("m2"));
        assert_eq!(record.options.max_turns, Some(3));

        // The next build carries the merged options
        let rebuilt = supervisor
            .create_or_resume("conv_1", None, record.options.clone(), Arc::new(NullSink))
            .await
            .unwrap();
        let old_dyn: Arc<dyn ExecutionClient> = client;
        assert!(!Arc::ptr_eq(&rebuilt, &old_dyn));
        let configs = factory.configs();
        assert_eq!(configs[1].options.model.as_deref(), Some("m2"));
        assert_eq!(supervisor.client_count(), 1);
    }

    #[tokio::test]
    async fn register_backend_session_mirrors_to_store() {
        let factory = ScriptedFactory::with_clients(vec![]);
        let store = Arc::new(SessionStore::open(":memory:").unwrap());
        let supervisor = Arc::new(SessionSupervisor::new(
            Arc::clone(&store),
            factory,
            Arc::new(PermissionBroker::new()),
        ));

        supervisor.register_backend_session("conv_1", "sess_7");
        assert_eq!(supervisor.backend_session_id("conv_1").as_deref(), Some("sess_7"));
        assert_eq!(
            supervisor.conversation_for_session("sess_7").as_deref(),
            Some("conv_1")
        );
        let row = store.get_session("conv_1").unwrap();
        assert_eq!(row.backend_session_id.as_deref(), Some("sess_7"));
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_clears_mappings() {
        let factory = ScriptedFactory::with_clients(vec![ScriptedClient::idle()]);
        let supervisor = supervisor_with(factory);

        let _ = supervisor
            .create_or_resume("conv_1", None, ExecOptions::default(), Arc::new(NullSink))
            .await
            .unwrap();
        supervisor.register_backend_session("conv_1", "sess_7");

        supervisor.remove("conv_1");
        assert!(supervisor.get_client("conv_1").is_none());
        assert!(supervisor.record("conv_1").is_none());
        assert!(supervisor.conversation_for_session("sess_7").is_none());

        // Second remove is a no-op
        supervisor.remove("conv_1");
    }

    #[tokio::test]
    async fn permission_callback_routes_through_broker_with_context() {
        let client = ScriptedClient::idle();
        let factory = ScriptedFactory::with_clients(vec![client]);
        let store = Arc::new(SessionStore::open(":memory:").unwrap());
        let broker = Arc::new(PermissionBroker::new());
        let supervisor = Arc::new(SessionSupervisor::new(
            store,
            factory.clone(),
            Arc::clone(&broker),
        ));
        let sink = Arc::new(RecordingSink::new());

        let _ = supervisor
            .create_or_resume("conv_1", None, ExecOptions::default(), sink.clone())
            .await
            .unwrap();
        supervisor.register_backend_session("conv_1", "sess_5");

        // Invoke the callback the factory received, the way the backend would
        let callback = Arc::clone(&factory.configs()[0].permission);
        let pending = tokio::spawn(async move {
            callback.check("Bash".into(), json!({"command": "ls"})).await
        });

        sink.wait_for_frames(1).await;
        let frames = sink.frames();
        let Outbound::Event(ev) = &frames[0] else {
            panic!("expected permission_request event, got {frames:?}");
        };
        assert_eq!(ev.event_type, "permission_request");
        assert_eq!(ev.conversation_id, "conv_1");
        // Session id discovered after client creation still reaches the prompt
        assert_eq!(ev.backend_session_id.as_deref(), Some("sess_5"));

        let request_id = ev.data["requestId"].as_str().unwrap().to_owned();
        let _ = broker.resolve(PermissionResponse {
            request_id,
            decision: PermissionVerdict::Allow,
            message: None,
            user_answers: None,
        });
        assert_matches!(pending.await.unwrap(), PermissionDecision::Allow { .. });
    }

    #[tokio::test]
    async fn get_client_touches_activity() {
        let factory = ScriptedFactory::with_clients(vec![ScriptedClient::idle()]);
        let supervisor = supervisor_with(factory);

        let _ = supervisor
            .create_or_resume("conv_1", None, ExecOptions::default(), Arc::new(NullSink))
            .await
            .unwrap();
        let before = supervisor.record("conv_1").unwrap().last_activity;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let _ = supervisor.get_client("conv_1").unwrap();
        let after = supervisor.record("conv_1").unwrap().last_activity;
        assert!(after > before);
    }
}
