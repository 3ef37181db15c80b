//! Consumer side of the pipeline: decode and persist.
//!
//! The [`Ingestor`] drains the bounded channel fed by the receive loop and
//! is the only writer to the event store. Each write runs on the blocking
//! pool under a timeout so a slow store cannot stall intake indefinitely.
//! Failed writes go to a [`RetryBuffer`]; pending events are always written
//! before newer ones so arrival order is kept.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sensorlog_events::{decode, Event, EventStore, StoredEvent};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::buffer::{OverflowPolicy, RetryBuffer};
use crate::error::WriteError;

/// A message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw message body.
    pub payload: Bytes,
    /// When the receive loop took the message off the connection.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Builds a message stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::received_at(topic, payload, Utc::now())
    }

    /// Builds a message with an explicit receive time.
    pub fn received_at(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at,
        }
    }
}

/// Tunables for the ingestor.
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Upper bound on a single store write.
    pub write_timeout: Duration,
    /// How many failed events may wait for a retry; `0` drops on failure.
    pub retry_buffer_capacity: usize,
    /// What to discard when the retry buffer is full.
    pub overflow_policy: OverflowPolicy,
    /// How often pending events are retried while no new messages arrive.
    pub retry_interval: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            retry_buffer_capacity: 1_000,
            overflow_policy: OverflowPolicy::DropOldest,
            retry_interval: Duration::from_secs(2),
        }
    }
}

/// Counters reported when the ingestor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Messages taken off the channel.
    pub received: u64,
    /// Events persisted (first attempt or retry).
    pub stored: u64,
    /// Events discarded (invalid, buffer overflow, or unflushed at exit).
    pub dropped: u64,
}

/// Single consumer that turns inbound messages into stored events.
pub struct Ingestor {
    store: Arc<dyn EventStore>,
    settings: IngestSettings,
    pending: RetryBuffer<Event>,
    stats: IngestStats,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("settings", &self.settings)
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Creates an ingestor writing to `store`.
    pub fn new(store: Arc<dyn EventStore>, settings: IngestSettings) -> Self {
        Self {
            store,
            pending: RetryBuffer::new(settings.retry_buffer_capacity, settings.overflow_policy),
            settings,
            stats: IngestStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Number of events waiting for a retry.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Processes messages until every sender is dropped, then makes a final
    /// flush attempt and returns the counters.
    pub async fn run(mut self, mut rx: mpsc::Receiver<InboundMessage>) -> IngestStats {
        let mut retry = tokio::time::interval(self.settings.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            write_timeout_ms = self.settings.write_timeout.as_millis() as u64,
            retry_buffer_capacity = self.pending.capacity(),
            overflow_policy = %self.settings.overflow_policy,
            "ingestor started"
        );

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = retry.tick(), if !self.pending.is_empty() => {
                    self.flush().await;
                }
            }
        }

        if !self.flush().await {
            let lost = self.pending.len() as u64;
            self.stats.dropped += lost;
            tracing::warn!(lost, "ingestor stopping with unflushed events");
        }

        tracing::info!(
            received = self.stats.received,
            stored = self.stats.stored,
            dropped = self.stats.dropped,
            "ingestor stopped"
        );
        self.stats
    }

    /// Decodes one message and persists it under its receive time.
    pub async fn handle(&mut self, message: InboundMessage) {
        self.stats.received += 1;

        let payload = decode(&message.payload);
        let event = match Event::new(message.topic, payload, message.received_at) {
            Ok(event) => event,
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!(error = %e, "discarding inbound message");
                return;
            }
        };

        if !self.flush().await {
            self.enqueue(event);
            return;
        }

        match self.write(&event).await {
            Ok(stored) => {
                self.stats.stored += 1;
                tracing::debug!(seq = stored.seq, topic = event.topic(), "stored event");
            }
            Err(e) => {
                tracing::warn!(error = %e, topic = event.topic(), "failed to store event");
                self.enqueue(event);
            }
        }
    }

    /// Writes pending events oldest first, stopping at the first failure.
    /// Returns whether the backlog is now empty.
    pub async fn flush(&mut self) -> bool {
        while let Some(event) = self.pending.front() {
            match self.write(event).await {
                Ok(_) => {
                    self.pending.pop_front();
                    self.stats.stored += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        pending = self.pending.len(),
                        "retry of pending events failed"
                    );
                    return false;
                }
            }
        }
        true
    }

    fn enqueue(&mut self, event: Event) {
        if let Some(discarded) = self.pending.push(event) {
            self.stats.dropped += 1;
            tracing::warn!(
                topic = discarded.topic(),
                received_at = %discarded.received_at(),
                pending = self.pending.len(),
                policy = %self.settings.overflow_policy,
                dropped_total = self.stats.dropped,
                "retry buffer full, dropping event"
            );
        }
    }

    // A write that times out keeps running on the blocking pool and may
    // still land, so a later retry can store the event twice.
    async fn write(&self, event: &Event) -> Result<StoredEvent, WriteError> {
        let store = Arc::clone(&self.store);
        let event = event.clone();
        let task = tokio::task::spawn_blocking(move || store.append(&event));

        match tokio::time::timeout(self.settings.write_timeout, task).await {
            Ok(joined) => Ok(joined??),
            Err(_) => Err(WriteError::Timeout(self.settings.write_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;
    use sensorlog_events::{MemoryEventStore, StoreError};
    use serde_json::json;

    fn settings(capacity: usize, policy: OverflowPolicy) -> IngestSettings {
        IngestSettings {
            write_timeout: Duration::from_millis(500),
            retry_buffer_capacity: capacity,
            overflow_policy: policy,
            retry_interval: Duration::from_millis(10),
        }
    }

    fn recent_topics(store: &MemoryEventStore) -> Vec<String> {
        store
            .query_recent(100)
            .unwrap()
            .into_iter()
            .map(|s| s.event.topic().to_string())
            .collect()
    }

    #[tokio::test]
    async fn stores_json_payload() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), IngestSettings::default());

        ingestor
            .handle(InboundMessage::new("sensors/mq135/room1", &b"{\"ppm\": 42}"[..]))
            .await;

        let stored = store.query_recent(1).unwrap();
        assert_eq!(stored[0].event.topic(), "sensors/mq135/room1");
        assert_eq!(stored[0].event.payload(), &json!({"ppm": 42}));
        assert_eq!(ingestor.stats().stored, 1);
    }

    #[tokio::test]
    async fn keeps_receive_time_from_the_message() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), IngestSettings::default());
        let received_at = Utc::now() - chrono::Duration::seconds(30);

        ingestor
            .handle(InboundMessage::received_at("a", &b"1"[..], received_at))
            .await;

        let stored = store.query_recent(1).unwrap();
        assert_eq!(
            stored[0].event.received_at(),
            received_at.trunc_subsecs(6)
        );
    }

    #[tokio::test]
    async fn wraps_non_json_payload() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), IngestSettings::default());

        ingestor
            .handle(InboundMessage::new("sensors/mq135/room1", &b"not-json"[..]))
            .await;

        let stored = store.query_recent(1).unwrap();
        assert_eq!(stored[0].event.payload(), &json!({"raw": "not-json"}));
    }

    #[tokio::test]
    async fn drops_message_with_empty_topic() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), IngestSettings::default());

        ingestor.handle(InboundMessage::new("", &b"{}"[..])).await;

        assert!(store.is_empty());
        assert_eq!(
            ingestor.stats(),
            IngestStats {
                received: 1,
                stored: 0,
                dropped: 1
            }
        );
    }

    #[tokio::test]
    async fn buffers_during_outage_and_flushes_in_order() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), settings(10, OverflowPolicy::DropOldest));

        store.set_available(false);
        for topic in ["a", "b", "c"] {
            ingestor.handle(InboundMessage::new(topic, &b"1"[..])).await;
        }
        assert_eq!(ingestor.pending(), 3);
        assert!(store.is_empty());

        store.set_available(true);
        ingestor.handle(InboundMessage::new("d", &b"1"[..])).await;

        assert_eq!(ingestor.pending(), 0);
        let seqs: Vec<(i64, String)> = store
            .query_recent(10)
            .unwrap()
            .into_iter()
            .map(|s| (s.seq, s.event.topic().to_string()))
            .collect();
        let mut by_seq = seqs.clone();
        by_seq.sort();
        let order: Vec<&str> = by_seq.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"], "insertion order must match arrival");
        assert_eq!(ingestor.stats().stored, 4);
    }

    #[tokio::test]
    async fn drop_oldest_keeps_latest_backlog() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), settings(2, OverflowPolicy::DropOldest));

        store.set_available(false);
        for topic in ["a", "b", "c"] {
            ingestor.handle(InboundMessage::new(topic, &b"1"[..])).await;
        }
        store.set_available(true);
        assert!(ingestor.flush().await);

        let mut topics = recent_topics(&store);
        topics.sort();
        assert_eq!(topics, vec!["b", "c"]);
        assert_eq!(ingestor.stats().dropped, 1);
    }

    #[tokio::test]
    async fn drop_newest_keeps_earliest_backlog() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), settings(2, OverflowPolicy::DropNewest));

        store.set_available(false);
        for topic in ["a", "b", "c"] {
            ingestor.handle(InboundMessage::new(topic, &b"1"[..])).await;
        }
        store.set_available(true);
        assert!(ingestor.flush().await);

        let mut topics = recent_topics(&store);
        topics.sort();
        assert_eq!(topics, vec!["a", "b"]);
        assert_eq!(ingestor.stats().dropped, 1);
    }

    #[tokio::test]
    async fn zero_capacity_drops_failed_writes() {
        let store = Arc::new(MemoryEventStore::new());
        let mut ingestor = Ingestor::new(store.clone(), settings(0, OverflowPolicy::DropOldest));

        store.set_available(false);
        ingestor.handle(InboundMessage::new("a", &b"1"[..])).await;
        store.set_available(true);

        assert_eq!(ingestor.pending(), 0);
        assert!(store.is_empty());
        assert_eq!(ingestor.stats().dropped, 1);
    }

    struct SlowStore;

    impl EventStore for SlowStore {
        fn append(&self, _event: &Event) -> Result<StoredEvent, StoreError> {
            std::thread::sleep(Duration::from_millis(200));
            Err(StoreError::Unavailable("too slow".to_string()))
        }

        fn query_recent(&self, _limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn slow_store_write_times_out() {
        let mut ingestor = Ingestor::new(
            Arc::new(SlowStore),
            IngestSettings {
                write_timeout: Duration::from_millis(20),
                ..settings(5, OverflowPolicy::DropOldest)
            },
        );

        let started = std::time::Instant::now();
        ingestor.handle(InboundMessage::new("a", &b"1"[..])).await;

        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(ingestor.pending(), 1);
    }

    #[tokio::test]
    async fn run_drains_channel_then_stops() {
        let store = Arc::new(MemoryEventStore::new());
        let ingestor = Ingestor::new(store.clone(), IngestSettings::default());
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(ingestor.run(rx));
        for i in 0..5 {
            tx.send(InboundMessage::new(format!("t{i}"), format!("{{\"i\": {i}}}")))
                .await
                .unwrap();
        }
        drop(tx);

        let stats = task.await.unwrap();
        assert_eq!(
            stats,
            IngestStats {
                received: 5,
                stored: 5,
                dropped: 0
            }
        );
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn run_retries_pending_on_tick() {
        let store = Arc::new(MemoryEventStore::new());
        let ingestor = Ingestor::new(store.clone(), settings(10, OverflowPolicy::DropOldest));
        let (tx, rx) = mpsc::channel(8);

        store.set_available(false);
        let task = tokio::spawn(ingestor.run(rx));
        tx.send(InboundMessage::new("a", &b"1"[..])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());
        store.set_available(true);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while store.is_empty() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len(), 1, "pending event should be retried without new traffic");

        drop(tx);
        let stats = task.await.unwrap();
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.dropped, 0);
    }
}
