//! Store error hierarchy.

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Pool checkout failure.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    /// A stored JSON blob failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A stored timestamp failed to parse.
    #[error("bad timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    /// Referenced session does not exist.
    #[error("session `{0}` not found")]
    SessionNotFound(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
