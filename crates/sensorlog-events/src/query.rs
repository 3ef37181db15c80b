//! "Most recent N events" read path.

use std::sync::Arc;

use crate::error::QueryError;
use crate::event::Event;
use crate::store::EventStore;

/// Limit used when the caller gives none or an unusable one.
pub const DEFAULT_LIMIT: usize = 100;

/// Largest limit honoured; bigger requests are clamped.
pub const MAX_LIMIT: usize = 1000;

/// Default and ceiling for the number of events per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Used when no valid limit is requested.
    pub default_limit: usize,
    /// Upper bound on any single response.
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl QueryLimits {
    /// Maps a requested limit to the number of events to fetch.
    ///
    /// Missing, zero and negative values fall back to the default; values
    /// above the ceiling are clamped. The result is always at least 1.
    pub fn resolve(&self, requested: Option<i64>) -> usize {
        let max = self.max_limit.max(1);
        let default = self.default_limit.clamp(1, max);
        match requested {
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(max).min(max),
            _ => default,
        }
    }
}

/// Parses a raw `limit` query parameter, treating garbage as absent.
pub fn parse_limit(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|value| value.trim().parse().ok())
}

/// Answers recent-event queries against a shared store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn EventStore>,
    limits: QueryLimits,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl QueryService {
    /// Creates a service reading from `store`.
    pub fn new(store: Arc<dyn EventStore>, limits: QueryLimits) -> Self {
        Self { store, limits }
    }

    /// The limits this service applies.
    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    /// Returns the most recently received events, newest first, with their
    /// storage identifiers stripped.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Unavailable` when the store cannot answer. An
    /// empty vector always means the store was reachable and held nothing.
    pub fn recent(&self, limit: Option<i64>) -> Result<Vec<Event>, QueryError> {
        let limit = self.limits.resolve(limit);
        let events = self
            .store
            .query_recent(limit)
            .map_err(QueryError::Unavailable)?;
        Ok(events.into_iter().map(|stored| stored.into_event()).collect())
    }
}
