//! # parlor-core
//!
//! Foundation types for the Parlor conversational-agent backend.
//!
//! This crate provides the shared vocabulary that all other Parlor crates
//! depend on:
//!
//! - **Messages**: [`message::ChatMessage`], the unit persisted and delivered
//!   to clients, plus [`message::ContentBlock`] content kinds
//! - **Agent events**: [`event::AgentEvent`] — the typed stream produced by
//!   an execution backend per query, including [`event::DeltaEvent`] stream
//!   deltas
//! - **Envelopes**: [`envelope::Inbound`] / [`envelope::Outbound`] wire frames
//!   for the bidirectional transport
//! - **Options**: [`options::ExecOptions`] per-conversation execution options
//!   with JSON deep-merge
//! - **Logging**: [`logging::init`] tracing-subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other parlor crates. No I/O.

#![deny(unsafe_code)]

pub mod envelope;
pub mod event;
pub mod logging;
pub mod message;
pub mod options;
