//! Broker-facing half of the sensorlog pipeline.
//!
//! Two tasks cooperate over a bounded channel:
//!
//! | Task | Type | Job |
//! |------|------|-----|
//! | receive loop | [`SubscriptionManager`] | connect, (re-)subscribe, stamp and forward publishes, back off on errors |
//! | consumer | [`Ingestor`] | decode, persist with a timeout, buffer failures |
//!
//! The channel preserves arrival order and applies backpressure: when it is
//! full the receive loop stops reading from the broker.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (tx, rx) = tokio::sync::mpsc::channel(settings.channel_capacity);
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let ingest = tokio::spawn(Ingestor::new(store, IngestSettings::default()).run(rx));
//! let (receive, status) = SubscriptionManager::start(settings, filters, tx, shutdown_rx)?;
//! ```

mod backoff;
mod buffer;
mod error;
mod ingest;
mod manager;
mod settings;
mod status;
mod topics;

pub use backoff::ReconnectBackoff;
pub use buffer::{OverflowPolicy, RetryBuffer};
pub use error::{ParseOverflowPolicyError, TopicFilterError, WriteError};
pub use ingest::{InboundMessage, IngestSettings, IngestStats, Ingestor};
pub use manager::{StopReason, SubscriptionManager};
pub use settings::{generate_client_id, BrokerSettings, Credentials};
pub use status::{BrokerStatus, ConnectionState};
pub use topics::{parse_topic_filters, validate_topic_filter, validate_topic_filters};
