//! Construction-time errors
//!
//! Suppression decisions and retrain failures are never surfaced as errors;
//! the only failures callers see are inconsistent configurations, rejected
//! when a component is built.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a positive duration, got {value}")]
    InvalidWindow { name: &'static str, value: String },

    #[error("{name} must be a positive integer, got {value}")]
    InvalidThreshold { name: &'static str, value: i64 },

    #[error("mute rule #{index} has no labels and would mute every alert")]
    EmptyMuteRule { index: usize },

    #[error("periodic retrain every {interval:?} requires a running Tokio runtime")]
    NoRuntime { interval: Duration },
}

impl ConfigError {
    pub(crate) fn zero_window(name: &'static str) -> Self {
        ConfigError::InvalidWindow {
            name,
            value: "0s".to_string(),
        }
    }
}

/// Convert a user-supplied number of seconds into a window, rejecting
/// negative, zero and non-finite values instead of clamping them.
pub fn window_from_secs(name: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidWindow {
            name,
            value: format!("{secs}s"),
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidWindow {
        name,
        value: format!("{secs}s"),
    })
}

/// Validate a user-supplied threshold.
pub fn threshold_from(name: &'static str, value: i64) -> Result<usize, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidThreshold { name, value });
    }
    usize::try_from(value).map_err(|_| ConfigError::InvalidThreshold { name, value })
}
