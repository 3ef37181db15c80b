//! Event and stored-event types for the telemetry log.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::EventError;

/// A telemetry event as received from the broker.
///
/// Serialises to exactly `topic`, `payload` and `received_at`; the storage
/// sequence lives on [`StoredEvent`] and never leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    topic: String,
    payload: Value,
    #[serde(serialize_with = "serialize_timestamp")]
    received_at: DateTime<Utc>,
}

impl Event {
    /// Builds an event, truncating `received_at` to microsecond precision
    /// (the precision the store keeps).
    ///
    /// # Errors
    ///
    /// Returns `EventError::EmptyTopic` for an empty topic and
    /// `EventError::NullPayload` for a JSON `null` payload.
    pub fn new(
        topic: impl Into<String>,
        payload: Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(EventError::EmptyTopic);
        }
        if payload.is_null() {
            return Err(EventError::NullPayload);
        }
        Ok(Self {
            topic,
            payload,
            received_at: received_at.trunc_subsecs(6),
        })
    }

    /// Builds an event stamped with the current wall-clock time.
    ///
    /// # Errors
    ///
    /// See [`Event::new`].
    pub fn received_now(topic: impl Into<String>, payload: Value) -> Result<Self, EventError> {
        Self::new(topic, payload, Utc::now())
    }

    /// The topic the message was published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The decoded payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// When the message reached the ingestion pipeline.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// An event together with the sequence number the store assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Monotonically increasing insertion sequence.
    pub seq: i64,
    /// The persisted event.
    pub event: Event,
}

impl StoredEvent {
    /// Drops the storage identifier.
    pub fn into_event(self) -> Event {
        self.event
    }
}

/// Formats a timestamp the way it is stored and transmitted:
/// RFC 3339, microseconds, `Z` suffix. Lexical order matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*ts))
}
