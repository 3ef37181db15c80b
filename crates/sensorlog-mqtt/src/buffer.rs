//! Bounded holding area for events whose store write failed.

use std::collections::VecDeque;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ParseOverflowPolicyError;

/// Which event is sacrificed when the retry buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending event to make room for the new one.
    #[default]
    DropOldest,
    /// Keep the backlog and discard the incoming event.
    DropNewest,
}

impl OverflowPolicy {
    /// Returns the canonical label for this policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DropOldest => "drop-oldest",
            Self::DropNewest => "drop-newest",
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = ParseOverflowPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "drop-oldest" => Ok(Self::DropOldest),
            "drop-newest" => Ok(Self::DropNewest),
            other => Err(ParseOverflowPolicyError(other.to_string())),
        }
    }
}

/// FIFO queue with a hard capacity and an explicit overflow policy.
#[derive(Debug)]
pub struct RetryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> RetryBuffer<T> {
    /// Creates an empty buffer. A capacity of zero holds nothing: every push
    /// is rejected.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            policy,
        }
    }

    /// Appends `item`, returning whatever had to be discarded to respect the
    /// capacity.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return None;
        }
        match self.policy {
            OverflowPolicy::DropNewest => Some(item),
            OverflowPolicy::DropOldest => {
                let evicted = self.items.pop_front();
                self.items.push_back(item);
                evicted
            }
        }
    }

    /// Oldest pending item.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Removes the oldest pending item.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of pending items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
