//! Engine error hierarchy.
//!
//! Every failure here is scoped to one conversation or one round — nothing
//! in the engine terminates the process.

/// Orchestration failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The execution backend refused to construct or connect a client.
    /// Reported as a terminal error for the affected turn only.
    #[error("failed to prepare execution client: {0}")]
    ClientBuild(String),
    /// A connected client failed mid-operation (query, event pull, interrupt).
    #[error("execution client error: {0}")]
    Client(String),
    /// A content-block delta arrived with no open stream — the backend broke
    /// the `message_start`-first contract. Fatal for the round.
    #[error("stream desync: {0}")]
    StreamDesync(&'static str),
    /// The first backend event of a fresh conversation did not carry the
    /// backend session id.
    #[error("backend session id unknown and first event was not a system message")]
    MissingSessionInit,
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Error-taxonomy discriminant used in outbound error envelopes.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ClientBuild(_) => "client_error",
            Self::Client(_) => "execution_error",
            Self::StreamDesync(_) | Self::MissingSessionInit => "round_error",
        }
    }
}
