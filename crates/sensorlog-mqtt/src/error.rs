//! Error types for the broker side of the pipeline.

use std::time::Duration;

use sensorlog_events::StoreError;

/// Problems with the configured topic filter list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicFilterError {
    /// No usable filter was configured.
    #[error("at least one topic filter is required")]
    Empty,

    /// A filter uses wildcards the broker would reject.
    #[error("invalid topic filter {filter:?}: {reason}")]
    Invalid {
        /// The offending filter.
        filter: String,
        /// Which rule it breaks.
        reason: &'static str,
    },
}

/// Unknown overflow policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown overflow policy {0:?}, expected \"drop-oldest\" or \"drop-newest\"")]
pub struct ParseOverflowPolicyError(pub String);

/// Why a single write to the event store did not complete.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The store did not answer within the write timeout.
    #[error("event store write timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking write task panicked or was cancelled.
    #[error("event store write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The store rejected the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}
