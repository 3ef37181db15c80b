//! Telemetry event log for sensorlog.
//!
//! Holds the event data model, the payload decoder that normalises raw
//! broker messages, the storage contract with its SQLite and in-memory
//! implementations, and the query service that serves the newest events.
//!
//! # Flow
//!
//! | Step | Item |
//! |------|------|
//! | raw bytes → JSON | [`decode`] |
//! | JSON → event | [`Event::received_now`] |
//! | persist | [`EventStore::append`] |
//! | read newest first | [`QueryService::recent`] |
//!
//! # Usage
//!
//! ```rust,ignore
//! use sensorlog_events::{decode, Event, EventStore, SqliteEventStore};
//!
//! let store = SqliteEventStore::initialize(pool, "readings")?;
//! let event = Event::received_now("sensors/mq135/room1", decode(br#"{"ppm": 42}"#))?;
//! store.append(&event)?;
//! ```

mod decode;
mod error;
mod event;
mod query;
mod store;

pub use decode::{decode, RAW_FIELD};
pub use error::{EventError, QueryError, StoreError};
pub use event::{format_timestamp, parse_timestamp, Event, StoredEvent};
pub use query::{parse_limit, QueryLimits, QueryService, DEFAULT_LIMIT, MAX_LIMIT};
pub use store::{EventStore, MemoryEventStore, SqliteEventStore};
