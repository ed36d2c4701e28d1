//! # parlor-engine
//!
//! The session orchestration core of Parlor.
//!
//! For each logical conversation, exactly one agent-execution task runs at a
//! time. This crate owns that invariant and everything it touches:
//!
//! - [`supervisor::SessionSupervisor`] — one execution client and one mutex
//!   per conversation; create/resume/reconfigure/teardown and the
//!   conversation↔backend-session id mapping
//! - [`registry::TaskRegistry`] — at most one live round task per
//!   conversation, with supersession (cancel-before-spawn) semantics
//! - [`round::RoundProcessor`] — reassembles the backend's raw event stream
//!   into stable, persisted message boundaries
//! - [`permission::PermissionBroker`] — request/response correlation for
//!   mid-execution tool approvals, with a fixed 60s timeout
//! - [`interrupt::InterruptController`] — cooperative-then-forced
//!   cancellation with a results-preserving synthetic terminal message
//! - [`chat::ChatRunner`] — the per-turn task body tying it all together
//!
//! External collaborators are consumed through seams: the execution backend
//! via [`client::ExecutionClient`]/[`client::ClientFactory`], the transport
//! via [`outbound::EventSink`], and persistence via `parlor_store`.

#![deny(unsafe_code)]

pub mod chat;
pub mod client;
pub mod errors;
pub mod interrupt;
pub mod outbound;
pub mod permission;
pub mod registry;
pub mod round;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{EngineError, Result};
