//! Task registry — at most one live round task per conversation.
//!
//! Submitting a turn for a conversation supersedes any round still running
//! for it: the predecessor receives its cancellation signal strictly before
//! the replacement is spawned (sequenced under the registry lock, without
//! waiting for the old task to unwind — it discovers cancellation at its
//! next suspension point).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;

/// One live round task.
struct ActiveRound {
    round_id: String,
    /// Cooperative cancellation signal for the task.
    cancel: CancellationToken,
    /// Fired when the task has unwound (completed, failed, or cancelled).
    done: CancellationToken,
}

/// Tracks the live round task of each conversation.
pub struct TaskRegistry {
    /// Shared with each spawned task's completion path.
    rounds: Arc<Mutex<HashMap<String, ActiveRound>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { rounds: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register and spawn a round task, superseding any live predecessor.
    ///
    /// The predecessor's cancellation is signalled before the new task is
    /// spawned, so the new round can never observe the old one still
    /// consuming the execution client past its next suspension point.
    pub fn submit<F>(&self, conversation_id: &str, round_id: &str, round: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        {
            let mut rounds = self.rounds.lock();
            if let Some(previous) = rounds.get(conversation_id) {
                if !previous.done.is_cancelled() {
                    info!(
                        conversation_id,
                        superseded = %previous.round_id,
                        by = %round_id,
                        "cancelling superseded round"
                    );
                    previous.cancel.cancel();
                }
            }
            let _ = rounds.insert(
                conversation_id.to_owned(),
                ActiveRound {
                    round_id: round_id.to_owned(),
                    cancel: cancel.clone(),
                    done: done.clone(),
                },
            );
            gauge!("parlor_rounds_active").set(rounds.len() as f64);
        }

        let rounds = Arc::clone(&self.rounds);
        let conversation_id = conversation_id.to_owned();
        let round_id = round_id.to_owned();
        let _handle = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(conversation_id, round_id, "round cancelled");
                }
                result = round => match result {
                    Ok(()) => debug!(conversation_id, round_id, "round completed"),
                    Err(e) => warn!(conversation_id, round_id, error = %e, "round failed"),
                },
            }
            done.cancel();
            finish(&rounds, &conversation_id, &round_id);
        });
    }

    /// Whether a round task is registered and not yet finished.
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.rounds
            .lock()
            .get(conversation_id)
            .is_some_and(|r| !r.done.is_cancelled())
    }

    /// Round id of the live task, if any.
    pub fn active_round_id(&self, conversation_id: &str) -> Option<String> {
        self.rounds
            .lock()
            .get(conversation_id)
            .filter(|r| !r.done.is_cancelled())
            .map(|r| r.round_id.clone())
    }

    /// Signal cancellation of the live round. Returns `true` if one existed.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let rounds = self.rounds.lock();
        if let Some(active) = rounds.get(conversation_id) {
            active.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Wait up to `window` for the live round to finish on its own.
    /// Returns `true` when the conversation is idle (already, or within the
    /// window), `false` when the round is still running afterwards.
    pub async fn wait_idle(&self, conversation_id: &str, window: Duration) -> bool {
        let Some(done) = self.done_token(conversation_id) else {
            return true;
        };
        tokio::time::timeout(window, done.cancelled()).await.is_ok()
    }

    /// Wait (unbounded) for the live round to unwind. Idle is immediate.
    pub async fn wait_unwound(&self, conversation_id: &str) {
        if let Some(done) = self.done_token(conversation_id) {
            done.cancelled().await;
        }
    }

    fn done_token(&self, conversation_id: &str) -> Option<CancellationToken> {
        self.rounds.lock().get(conversation_id).map(|r| r.done.clone())
    }

    /// Number of registered rounds (finished-but-unremoved entries included).
    pub fn len(&self) -> usize {
        self.rounds.lock().len()
    }

    /// Whether no rounds are registered.
    pub fn is_empty(&self) -> bool {
        self.rounds.lock().is_empty()
    }

    /// Cancel every live round. Shutdown path.
    pub fn cancel_all(&self) {
        let rounds = self.rounds.lock();
        for active in rounds.values() {
            active.cancel.cancel();
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove the entry — but only if it still belongs to `round_id`, so a
/// stale completion never evicts a newer round's registration.
fn finish(rounds: &Mutex<HashMap<String, ActiveRound>>, conversation_id: &str, round_id: &str) {
    let mut rounds = rounds.lock();
    if rounds.get(conversation_id).is_some_and(|r| r.round_id == round_id) {
        let _ = rounds.remove(conversation_id);
    }
    gauge!("parlor_rounds_active").set(rounds.len() as f64);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
