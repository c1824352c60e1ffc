//! Health reporting for the anomaly monitor
//!
//! Component health is derived on demand from the live components (retrain
//! scheduler, alert delivery) instead of being pushed by them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::retrain::{RetrainScheduler, RetrainState};

/// Consecutive delivery failures after which the sink is reported unhealthy
const DELIVERY_UNHEALTHY_AFTER: u64 = 5;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but the last operation failed
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const RETRAIN_SCHEDULER: &str = "retrain_scheduler";
    pub const ALERT_SINK: &str = "alert_sink";
}

/// Anything that can report its own health
pub trait HealthCheck: Send + Sync {
    fn check(&self) -> ComponentHealth;
}

impl HealthCheck for RetrainScheduler {
    fn check(&self) -> ComponentHealth {
        if self.is_shut_down() {
            return ComponentHealth::unhealthy("retrain scheduler shut down");
        }
        match self.stats().last_error {
            Some(error) => ComponentHealth::degraded(format!("last retrain failed: {error}")),
            None if self.state() == RetrainState::Retraining => {
                ComponentHealth::with_status(ComponentStatus::Healthy, Some("retraining".into()))
            }
            None => ComponentHealth::healthy(),
        }
    }
}

/// Outcome tracking for alert delivery
#[derive(Debug, Default)]
pub struct DeliveryStatus {
    consecutive_failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl DeliveryStatus {
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.into());
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HealthCheck for DeliveryStatus {
    fn check(&self) -> ComponentHealth {
        let failures = self.consecutive_failures();
        let error = self.last_error().unwrap_or_default();
        match failures {
            0 => ComponentHealth::healthy(),
            n if n >= DELIVERY_UNHEALTHY_AFTER => {
                ComponentHealth::unhealthy(format!("{n} consecutive delivery failures: {error}"))
            }
            n => ComponentHealth::degraded(format!("{n} consecutive delivery failures: {error}")),
        }
    }
}

/// Registry of health checks plus the process readiness flag
#[derive(Clone, Default)]
pub struct HealthRegistry {
    checks: Vec<(String, Arc<dyn HealthCheck>)>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push((name.to_string(), check));
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn health(&self) -> HealthResponse {
        let components: HashMap<String, ComponentHealth> = self
            .checks
            .iter()
            .map(|(name, check)| (name.clone(), check.check()))
            .collect();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        if !self.ready.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("Monitor not yet initialized".to_string()),
            };
        }
        if self.health().status == ComponentStatus::Unhealthy {
            return ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            };
        }
        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
