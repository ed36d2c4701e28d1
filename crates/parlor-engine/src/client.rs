//! Execution-backend client abstraction.
//!
//! The backend is an opaque process that accepts a query and yields a
//! sequence of typed [`AgentEvent`]s until a terminal result. The engine
//! only ever talks to it through these traits, which is also what makes the
//! orchestration core testable without a live backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parlor_core::event::AgentEvent;
use parlor_core::options::ExecOptions;
use serde_json::Value;

use crate::errors::Result;

/// Outcome of a permission prompt.
#[derive(Clone, Debug, PartialEq)]
pub enum PermissionDecision {
    /// Tool use approved; `updated_input` replaces the original tool input
    /// (it may carry restructured answers for question tools).
    Allow {
        /// Input the backend should proceed with.
        updated_input: Value,
    },
    /// Tool use rejected.
    Deny {
        /// Reason reported back to the backend.
        message: String,
    },
}

/// Future returned by a permission callback.
pub type PermissionFuture = Pin<Box<dyn Future<Output = PermissionDecision> + Send>>;

/// Callback invoked by the backend from inside its own execution whenever a
/// tool needs approval. It is a suspension point: the backend blocks on the
/// returned future until the decision arrives or times out.
pub trait PermissionCallback: Send + Sync {
    /// Ask for permission to run `tool_name` with `tool_input`.
    fn check(&self, tool_name: String, tool_input: Value) -> PermissionFuture;
}

impl<F> PermissionCallback for F
where
    F: Fn(String, Value) -> PermissionFuture + Send + Sync,
{
    fn check(&self, tool_name: String, tool_input: Value) -> PermissionFuture {
        self(tool_name, tool_input)
    }
}

/// Everything needed to construct one execution client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Conversation the client serves.
    pub conversation_id: String,
    /// Execution options (stored per conversation, merged on reconfigure).
    pub options: ExecOptions,
    /// Backend session id to resume from, if the conversation has history.
    pub resume: Option<String>,
    /// Permission callback, closed over the conversation id.
    pub permission: Arc<dyn PermissionCallback>,
}

/// Handle to one execution backend client.
///
/// Access is serialized per conversation by the supervisor's conversation
/// mutex; implementations may assume a single in-flight query at a time.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Establish the backend connection.
    async fn connect(&self) -> Result<()>;
    /// Tear the connection down.
    async fn disconnect(&self) -> Result<()>;
    /// Signal a cooperative interrupt of the in-flight query.
    async fn interrupt(&self) -> Result<()>;
    /// Submit a user query.
    async fn query(&self, text: &str) -> Result<()>;
    /// Pull the next event of the current query's stream. `None` means the
    /// stream ended without a terminal result (backend went away).
    async fn next_event(&self) -> Result<Option<AgentEvent>>;
}

/// Builds execution clients. The production implementation shells out to
/// the agent backend; tests substitute scripted clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Construct (but do not connect) a client for `config`.
    async fn build(&self, config: ClientConfig) -> Result<Arc<dyn ExecutionClient>>;
}
