//! Deduplication of alerts within a cool-down window
//!
//! Single-slot: only the last time an identity was let through is kept.
//! A suppressed repeat does not move that instant, so the cool-down runs
//! from the first occurrence rather than the latest.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::ConfigError;

/// Drops repeats of an identity within the dedup window
#[derive(Debug)]
pub struct Deduplicator {
    dedup_window: Duration,
    /// identity -> last instant the identity was let through
    last_seen: DashMap<String, Instant>,
}

impl Deduplicator {
    /// Rejects a zero window.
    pub fn new(dedup_window: Duration) -> Result<Self, ConfigError> {
        if dedup_window.is_zero() {
            return Err(ConfigError::zero_window("dedup_window"));
        }
        Ok(Self {
            dedup_window,
            last_seen: DashMap::new(),
        })
    }

    /// Cool-down window after an identity is let through
    pub fn window(&self) -> Duration {
        self.dedup_window
    }

    /// True when `key` was let through within the window; otherwise records
    /// `key` as seen now.
    pub fn is_duplicate(&self, key: &str) -> bool {
        self.is_duplicate_at(key, Instant::now())
    }

    pub fn is_duplicate_at(&self, key: &str, now: Instant) -> bool {
        match self.last_seen.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                if now.saturating_duration_since(last) <= self.dedup_window {
                    info!(
                        event = "deduplicated",
                        key = %key,
                        window = ?self.dedup_window,
                        since_last_ms = now.saturating_duration_since(last).as_millis() as u64,
                        "Duplicate alert suppressed"
                    );
                    return true;
                }
                entry.insert(now);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        }
    }

    /// Forget identities whose cool-down has already expired.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, last| now.saturating_duration_since(*last) <= self.dedup_window);
        before.saturating_sub(self.last_seen.len())
    }

    /// Number of identities currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.last_seen.len()
    }
}
