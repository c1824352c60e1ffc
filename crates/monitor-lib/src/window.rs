//! Sliding window event counter
//!
//! Keeps a per-key ledger of event timestamps and prunes everything older
//! than the window on every access. Shared by flapping detection and the
//! event-driven retrain trigger.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::ConfigError;

/// Timestamps recorded for a single key
#[derive(Debug, Default)]
struct Ledger {
    timestamps: VecDeque<Instant>,
    /// Freshest instant ever passed for this key; pruning is relative to it
    freshest: Option<Instant>,
}

impl Ledger {
    fn advance(&mut self, now: Instant) -> Instant {
        let reference = match self.freshest {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        self.freshest = Some(reference);
        reference
    }

    fn prune(&mut self, reference: Instant, window: Duration) {
        self.timestamps
            .retain(|t| reference.saturating_duration_since(*t) <= window);
    }
}

/// Per-key sliding window counter
///
/// Each key lives in its own map shard entry, so prune+append+count for one
/// key happens under that entry's lock and is atomic with respect to other
/// callers on the same key. Different keys do not contend unless they share
/// a shard.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    window: Duration,
    ledgers: DashMap<String, Ledger>,
}

impl SlidingWindowCounter {
    /// Create a counter; a zero window is rejected.
    pub fn new(window: Duration) -> Result<Self, ConfigError> {
        if window.is_zero() {
            return Err(ConfigError::zero_window("window"));
        }
        Ok(Self {
            window,
            ledgers: DashMap::new(),
        })
    }

    /// Length of the sliding window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event for `key` at `now` and return the in-window count,
    /// including the event just recorded.
    pub fn record(&self, key: &str, now: Instant) -> usize {
        let window = self.window;
        self.with_ledger(key, |ledger| {
            let reference = ledger.advance(now);
            ledger.timestamps.push_back(now);
            ledger.prune(reference, window);
            ledger.timestamps.len()
        })
    }

    /// Record an event and, if the in-window count reaches `threshold`,
    /// clear the ledger under the same entry lock and return that count.
    ///
    /// Exactly one caller observes each threshold crossing.
    pub fn record_and_take(&self, key: &str, now: Instant, threshold: usize) -> Option<usize> {
        let window = self.window;
        self.with_ledger(key, |ledger| {
            let reference = ledger.advance(now);
            ledger.timestamps.push_back(now);
            ledger.prune(reference, window);
            let count = ledger.timestamps.len();
            if count < threshold {
                return None;
            }
            ledger.timestamps.clear();
            Some(count)
        })
    }

    /// Run `f` on the ledger for `key` under its entry lock, creating it on
    /// first use. Existing keys skip the key allocation.
    fn with_ledger<R>(&self, key: &str, f: impl FnOnce(&mut Ledger) -> R) -> R {
        if let Some(mut ledger) = self.ledgers.get_mut(key) {
            return f(ledger.value_mut());
        }
        let mut ledger = self.ledgers.entry(key.to_string()).or_default();
        f(ledger.value_mut())
    }

    /// Prune and count without recording.
    pub fn count(&self, key: &str, now: Instant) -> usize {
        match self.ledgers.get_mut(key) {
            Some(mut ledger) => {
                let reference = ledger.advance(now);
                ledger.prune(reference, self.window);
                ledger.timestamps.len()
            }
            None => 0,
        }
    }

    /// Clear every recorded event for `key`. The key stays tracked.
    pub fn reset(&self, key: &str) {
        if let Some(mut ledger) = self.ledgers.get_mut(key) {
            ledger.timestamps.clear();
        }
    }

    /// Drop keys with no in-window events left. Returns how many were removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let window = self.window;
        let before = self.ledgers.len();
        self.ledgers.retain(|_, ledger| {
            let reference = ledger.advance(now);
            ledger.prune(reference, window);
            !ledger.timestamps.is_empty()
        });
        before.saturating_sub(self.ledgers.len())
    }

    /// Number of keys currently holding a ledger entry
    pub fn tracked_keys(&self) -> usize {
        self.ledgers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_window_rejected() {
        assert!(SlidingWindowCounter::new(Duration::ZERO).is_err());
    }

    #[test]
    fn test_counts_all_events_inside_window() {
        let counter = SlidingWindowCounter::new(Duration::from_secs(10)).unwrap();
        let start = Instant::now();

        for n in 1..=5 {
            let now = start + Duration::from_secs(n as u64);
            assert_eq!(counter.record("k", now), n);
        }
    }

    #[test]
    fn test_steady_state_at_window_over_spacing() {
        // window 10s, events 2s apart -> oldest retained is exactly 10s old
        let counter = SlidingWindowCounter::new(Duration::from_secs(10)).unwrap();
        let start = Instant::now();
        let mut last = 0;

        for i in 0..30u64 {
            last = counter.record("k", start + Duration::from_secs(i * 2));
        }

        // entries at t-10, t-8, ..., t are all in-window (inclusive bound)
        assert_eq!(last, 10 / 2 + 1);
        assert_eq!(counter.count("k", start + Duration::from_secs(58)), 6);
    }

    #[test]
    fn test_count_prunes_without_recording() {
        let counter = SlidingWindowCounter::new(Duration::from_secs(5)).unwrap();
        let start = Instant::now();

        counter.record("k", start);
        counter.record("k", start + Duration::from_secs(1));

        assert_eq!(counter.count("k", start + Duration::from_secs(2)), 2);
        assert_eq!(counter.count("k", start + Duration::from_secs(6)), 1);
        assert_eq!(counter.count("k", start + Duration::from_secs(7)), 0);
        assert_eq!(counter.count("missing", start), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let counter = SlidingWindowCounter::new(Duration::from_secs(5)).unwrap();
        let now = Instant::now();

        counter.record("a", now);
        counter.record("a", now);
        assert_eq!(counter.record("b", now), 1);
        assert_eq!(counter.count("a", now), 2);
    }

    #[test]
    fn test_reset_clears_ledger() {
        let counter = SlidingWindowCounter::new(Duration::from_secs(60)).unwrap();
        let now = Instant::now();

        counter.record("k", now);
        counter.record("k", now);
        counter.reset("k");

        assert_eq!(counter.count("k", now), 0);
        assert_eq!(counter.tracked_keys(), 1);
        assert_eq!(counter.record("k", now), 1);
    }

    #[test]
    fn test_record_and_take_clears_at_threshold() {
        let counter = SlidingWindowCounter::new(Duration::from_secs(60)).unwrap();
        let now = Instant::now();

        assert_eq!(counter.record_and_take("k", now, 3), None);
        assert_eq!(counter.record_and_take("k", now, 3), None);
        assert_eq!(counter.record_and_take("k", now, 3), Some(3));
        assert_eq!(counter.count("k", now), 0);
        assert_eq!(counter.record_and_take("k", now, 3), None);
        assert_eq!(counter.count("k", now), 1);
    }

    #[test]
    fn test_record_and_take_has_one_winner_per_crossing() {
        let counter = Arc::new(SlidingWindowCounter::new(Duration::from_secs(3600)).unwrap());
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    (0..100)
                        .filter(|_| counter.record_and_take("burst", now, 10).is_some())
                        .count()
                })
            })
            .collect();

        let crossings: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(crossings, 80);
        assert_eq!(counter.count("burst", now), 0);
    }

    #[test]
    fn test_out_of_order_timestamps_prune_against_freshest() {
        let counter = SlidingWindowCounter::new(Duration::from_secs(5)).unwrap();
        let start = Instant::now();

        counter.record("k", start + Duration::from_secs(10));
        // late arrival, already older than the window relative to t=10
        assert_eq!(counter.record("k", start + Duration::from_secs(4)), 1);
        // still in-window relative to t=10
        assert_eq!(counter.record("k", start + Duration::from_secs(6)), 2);
    }

    #[test]
    fn test_sweep_idle_drops_stale_keys() {
        let counter = SlidingWindowCounter::new(Duration::from_secs(5)).unwrap();
        let start = Instant::now();

        counter.record("old", start);
        counter.record("fresh", start + Duration::from_secs(8));

        let removed = counter.sweep_idle(start + Duration::from_secs(9));
        assert_eq!(removed, 1);
        assert_eq!(counter.tracked_keys(), 1);
        assert_eq!(counter.count("fresh", start + Duration::from_secs(9)), 1);
    }

    #[test]
    fn test_concurrent_records_on_same_key() {
        let counter = Arc::new(SlidingWindowCounter::new(Duration::from_secs(3600)).unwrap());
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..250 {
                        counter.record("shared", now);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.count("shared", now), 2000);
    }
}
