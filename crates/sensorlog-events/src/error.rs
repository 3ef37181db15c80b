//! Error types for the event log.

/// Reasons an [`Event`](crate::Event) cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Every event must name the topic it arrived on.
    #[error("event topic must not be empty")]
    EmptyTopic,

    /// Payloads are always present; decoders substitute a fallback instead.
    #[error("event payload must not be null")]
    NullPayload,
}

/// Errors that can occur during event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (no connection, lock poisoned,
    /// simulated outage).
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// A database operation failed.
    #[error("event store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("event store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row could not be turned back into an event.
    #[error("corrupt event row {seq}: {reason}")]
    Corrupt {
        /// Storage sequence of the offending row.
        seq: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// Schema setup failed or the table name was rejected.
    #[error(transparent)]
    Migration(#[from] sensorlog_db::MigrationError),
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Errors surfaced by the query service.
///
/// Callers only learn that the store is unavailable; the underlying cause is
/// kept as the error source for logging.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The store could not answer the query.
    #[error("event store unavailable")]
    Unavailable(#[source] StoreError),
}
