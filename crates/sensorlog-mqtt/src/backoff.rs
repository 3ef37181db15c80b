//! Reconnect pacing.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

/// Exponential backoff with jitter between reconnect attempts, capped at a
/// maximum delay and reset after every successful connection.
pub struct ReconnectBackoff {
    builder: ExponentialBuilder,
    current: ExponentialBackoff,
    max: Duration,
}

impl std::fmt::Debug for ReconnectBackoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectBackoff")
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl ReconnectBackoff {
    /// Creates a backoff starting at `min` and never exceeding `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        let builder = ExponentialBuilder::default()
            .with_min_delay(min)
            .with_max_delay(max)
            .with_max_times(usize::MAX)
            .with_jitter();
        Self {
            current: builder.build(),
            builder,
            max,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.current.next().unwrap_or(self.max).min(self.max)
    }

    /// Starts over from the minimum delay.
    pub fn reset(&mut self) {
        self.current = self.builder.build();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_stay_capped() {
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(200);
        let mut backoff = ReconnectBackoff::new(min, max);

        let delays: Vec<Duration> = (0..20).map(|_| backoff.next_delay()).collect();
        assert!(delays.iter().all(|d| *d <= max), "{delays:?}");
        assert!(delays[0] >= min, "{delays:?}");
        assert!(delays[0] <= min * 2, "{delays:?}");
        assert!(delays[19] > delays[0], "{delays:?}");
    }

    #[test]
    fn reset_returns_to_minimum() {
        let min = Duration::from_millis(10);
        let mut backoff = ReconnectBackoff::new(min, Duration::from_secs(5));
        for _ in 0..8 {
            backoff.next_delay();
        }
        backoff.reset();
        assert!(backoff.next_delay() <= min * 2);
    }

    #[test]
    fn max_below_min_is_raised() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(50), Duration::from_millis(1));
        assert!(backoff.next_delay() <= Duration::from_millis(50));
    }
}
