//! Per-cluster retry backoff

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use std::time::Duration;

/// Exponential backoff state keyed by cluster
///
/// Grows on every consecutive failure of the same cluster and is dropped on
/// the first successful pass.
pub struct ClusterBackoff {
    entries: DashMap<String, ExponentialBackoff>,
    initial: Duration,
    max: Duration,
}

impl ClusterBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            initial,
            max: max.max(initial),
        }
    }

    fn build(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial)
            .with_max_interval(self.max)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay before the next attempt for `key`
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| self.build());
        entry.next_backoff().unwrap_or(self.max).min(self.max)
    }

    /// Forget the failure history of `key`
    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Number of clusters currently backing off
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ClusterBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}
