//! Persistence for the telemetry log.
//!
//! The pipeline only needs two capabilities from storage: an ordered append
//! and a "most recent N" range query. [`EventStore`] captures exactly that;
//! [`SqliteEventStore`] is the production backend and
//! [`MemoryEventStore`] backs tests.
//!
//! Ordering is `received_at` descending with the insertion sequence as the
//! tie-breaker, so repeated queries against an unchanged store return the
//! same order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use rusqlite::params;
use sensorlog_db::{run_migrations, validate_table_name, DbPool};

use crate::error::StoreError;
use crate::event::{format_timestamp, parse_timestamp, Event, StoredEvent};

/// Append + recent-range capability consumed by ingestion and queries.
pub trait EventStore: Send + Sync {
    /// Persists one event and returns it with its assigned sequence.
    fn append(&self, event: &Event) -> Result<StoredEvent, StoreError>;

    /// Returns up to `limit` events, newest `received_at` first.
    fn query_recent(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError>;
}

/// SQLite-backed event store.
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: DbPool,
    table: String,
}

impl std::fmt::Debug for SqliteEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEventStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SqliteEventStore {
    /// Wraps an existing pool whose schema is already in place.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Migration` if `table` is not a valid identifier.
    pub fn new(pool: DbPool, table: impl Into<String>) -> Result<Self, StoreError> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    /// Runs pending migrations for `table`, then wraps the pool.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if no connection can be obtained and
    /// `StoreError::Migration` if the schema cannot be created.
    pub fn initialize(pool: DbPool, table: impl Into<String>) -> Result<Self, StoreError> {
        let store = Self::new(pool, table)?;
        let conn = store.pool.get()?;
        let applied = run_migrations(&conn, &store.table)?;
        if applied > 0 {
            tracing::info!(count = applied, table = %store.table, "applied database migrations");
        }
        Ok(store)
    }

    /// Name of the table events are written to.
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: &Event) -> Result<StoredEvent, StoreError> {
        let conn = self.pool.get()?;
        let payload_json = serde_json::to_string(event.payload())?;

        let seq: i64 = conn.query_row(
            &format!(
                "INSERT INTO {} (topic, payload_json, received_at)
                 VALUES (?1, ?2, ?3)
                 RETURNING seq",
                self.table
            ),
            params![
                event.topic(),
                payload_json,
                format_timestamp(event.received_at())
            ],
            |row| row.get(0),
        )?;

        Ok(StoredEvent {
            seq,
            event: event.clone(),
        })
    }

    fn query_recent(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.pool.get()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(&format!(
            "SELECT seq, topic, payload_json, received_at
             FROM {}
             ORDER BY received_at DESC, seq DESC
             LIMIT ?1",
            self.table
        ))?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, topic, payload_json, received_at) = row?;
            let payload = serde_json::from_str(&payload_json)?;
            let received_at = parse_timestamp(&received_at).map_err(|e| StoreError::Corrupt {
                seq,
                reason: format!("bad received_at {received_at:?}: {e}"),
            })?;
            let event = Event::new(topic, payload, received_at).map_err(|e| {
                StoreError::Corrupt {
                    seq,
                    reason: e.to_string(),
                }
            })?;
            events.push(StoredEvent { seq, event });
        }

        Ok(events)
    }
}

/// In-process event store for tests and embedding.
///
/// Can be flipped into an unavailable state to exercise outage handling.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
    unavailable: AtomicBool,
}

impl MemoryEventStore {
    /// Creates an empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of persisted events.
    pub fn len(&self) -> usize {
        self.events.read().map(|events| events.len()).unwrap_or(0)
    }

    /// Whether nothing has been persisted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, event: &Event) -> Result<StoredEvent, StoreError> {
        self.check_available()?;
        let mut events = self
            .events
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        let stored = StoredEvent {
            seq: events.len() as i64 + 1,
            event: event.clone(),
        };
        events.push(stored.clone());
        Ok(stored)
    }

    fn query_recent(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        self.check_available()?;
        let events = self
            .events
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        let mut recent: Vec<StoredEvent> = events.clone();
        recent.sort_by(|a, b| {
            b.event
                .received_at()
                .cmp(&a.event.received_at())
                .then(b.seq.cmp(&a.seq))
        });
        recent.truncate(limit);
        Ok(recent)
    }
}
