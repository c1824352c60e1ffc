//! Flapping suppression
//!
//! An identity that fires `threshold` or more times inside `window` is
//! considered flapping. Every check records an occurrence, so an identity
//! hovering at the threshold stays suppressed until enough of its history
//! ages out.

use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ConfigError;
use crate::window::SlidingWindowCounter;

/// Per-identity flapping detector
#[derive(Debug)]
pub struct FlappingSuppressor {
    counter: SlidingWindowCounter,
    threshold: usize,
}

impl FlappingSuppressor {
    /// Rejects a zero window or a zero threshold.
    pub fn new(window: Duration, threshold: usize) -> Result<Self, ConfigError> {
        if threshold == 0 {
            return Err(ConfigError::InvalidThreshold {
                name: "flap_threshold",
                value: 0,
            });
        }
        let counter =
            SlidingWindowCounter::new(window).map_err(|_| ConfigError::zero_window("flap_window"))?;
        Ok(Self { counter, threshold })
    }

    /// Window over which occurrences are counted
    pub fn window(&self) -> Duration {
        self.counter.window()
    }

    /// In-window occurrences at which an identity counts as flapping
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record an occurrence of `identity` now and report whether it is flapping.
    pub fn should_suppress(&self, identity: &str) -> bool {
        self.should_suppress_at(identity, Instant::now())
    }

    /// Same as [`should_suppress`](Self::should_suppress) at an explicit instant.
    pub fn should_suppress_at(&self, identity: &str, now: Instant) -> bool {
        let count = self.counter.record(identity, now);
        if count < self.threshold {
            return false;
        }

        warn!(
            event = "suppressed",
            key = %identity,
            window = ?self.counter.window(),
            threshold = self.threshold,
            count = count,
            "Suppressing flapping alert"
        );
        true
    }

    /// Drop identities with no occurrences left in the window.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        self.counter.sweep_idle(now)
    }

    /// Number of identities currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.counter.tracked_keys()
    }
}
