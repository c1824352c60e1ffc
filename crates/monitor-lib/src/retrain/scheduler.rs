//! Retrain scheduler
//!
//! Owns an optional periodic timer task and an optional event-count trigger,
//! both funnelled through one gate so retrain callbacks never overlap.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::observability::MonitorMetrics;
use crate::window::SlidingWindowCounter;

/// Ledger key shared by every retrain-triggering event
pub const RETRAIN_EVENT_KEY: &str = "retrain_events";

/// Side-effecting retrain operation supplied by the caller
pub type RetrainCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Retrain trigger configuration
///
/// With neither a periodic interval nor an event threshold/window pair the
/// scheduler is inert: legal, but it never fires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrainConfig {
    /// Fire every interval regardless of load
    pub periodic_interval: Option<Duration>,
    /// Fire when this many events land within `event_window`
    pub event_threshold: Option<usize>,
    pub event_window: Option<Duration>,
}

impl RetrainConfig {
    pub fn periodic(interval: Duration) -> Self {
        Self {
            periodic_interval: Some(interval),
            ..Default::default()
        }
    }

    pub fn event_driven(threshold: usize, window: Duration) -> Self {
        Self {
            event_threshold: Some(threshold),
            event_window: Some(window),
            ..Default::default()
        }
    }

    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = Some(interval);
        self
    }

    /// Reject zero windows, a zero periodic interval and a zero threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.periodic_interval.is_some_and(|p| p.is_zero()) {
            return Err(ConfigError::zero_window("periodic_interval"));
        }
        if self.event_window.is_some_and(|w| w.is_zero()) {
            return Err(ConfigError::zero_window("event_window"));
        }
        if self.event_threshold == Some(0) {
            return Err(ConfigError::InvalidThreshold {
                name: "event_threshold",
                value: 0,
            });
        }
        Ok(())
    }

    /// Threshold and window of the event trigger. Only one of the two being
    /// set leaves the event trigger disabled.
    pub fn event_trigger(&self) -> Option<(usize, Duration)> {
        self.event_threshold.zip(self.event_window)
    }

    /// True when neither trigger can ever fire
    pub fn is_inert(&self) -> bool {
        self.periodic_interval.is_none() && self.event_trigger().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainState {
    Idle,
    Retraining,
}

/// What caused a retrain attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    EventThreshold,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Periodic => "periodic",
            Trigger::EventThreshold => "event_threshold",
            Trigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Another retrain was already running
    Busy,
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainOutcome {
    Completed,
    /// The callback returned an error or panicked
    Failed,
    Dropped(DropReason),
}

impl RetrainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrainOutcome::Completed => "completed",
            RetrainOutcome::Failed => "failed",
            RetrainOutcome::Dropped(DropReason::Busy) => "dropped_busy",
            RetrainOutcome::Dropped(DropReason::ShutDown) => "dropped_shutdown",
        }
    }
}

/// Counters describing the scheduler's history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrainStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Error of the most recent retrain, cleared when a later one completes
    pub last_error: Option<String>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// State behind the single mutual-exclusion lock
#[derive(Debug)]
struct Gate {
    state: RetrainState,
    shut_down: bool,
    stats: RetrainStats,
}

struct EventTrigger {
    counter: SlidingWindowCounter,
    threshold: usize,
}

struct Inner {
    callback: RetrainCallback,
    gate: Mutex<Gate>,
    events: Option<EventTrigger>,
    metrics: MonitorMetrics,
}

impl Inner {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shut_down(&self) -> bool {
        self.gate().shut_down
    }

    /// Run the callback unless a retrain is in flight or we are shut down.
    /// The gate is only held for the check-and-transition, never across the
    /// callback itself.
    fn fire(&self, trigger: Trigger) -> RetrainOutcome {
        {
            let mut gate = self.gate();
            let refusal = if gate.shut_down {
                Some(DropReason::ShutDown)
            } else if gate.state == RetrainState::Retraining {
                Some(DropReason::Busy)
            } else {
                None
            };

            if let Some(reason) = refusal {
                gate.stats.dropped += 1;
                drop(gate);
                let outcome = RetrainOutcome::Dropped(reason);
                debug!(
                    trigger = trigger.as_str(),
                    reason = ?reason,
                    "Retrain trigger dropped"
                );
                self.metrics.record_retrain(trigger.as_str(), outcome.as_str());
                return outcome;
            }

            gate.state = RetrainState::Retraining;
            gate.stats.started += 1;
        }

        info!(
            event = "retrain_started",
            trigger = trigger.as_str(),
            "Starting model retraining"
        );
        self.metrics.set_retrain_in_progress(true);

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)()));
        let elapsed = started.elapsed();

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        {
            let mut gate = self.gate();
            gate.state = RetrainState::Idle;
            match &failure {
                None => {
                    gate.stats.completed += 1;
                    gate.stats.last_error = None;
                    gate.stats.last_completed_at = Some(Utc::now());
                }
                Some(message) => {
                    gate.stats.failed += 1;
                    gate.stats.last_error = Some(message.clone());
                }
            }
        }

        self.metrics.set_retrain_in_progress(false);
        self.metrics.observe_retrain_duration(elapsed);

        let outcome = match failure {
            None => {
                info!(
                    event = "retrain_completed",
                    trigger = trigger.as_str(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Model retraining completed"
                );
                RetrainOutcome::Completed
            }
            Some(message) => {
                error!(
                    event = "retrain_failed",
                    trigger = trigger.as_str(),
                    duration_ms = elapsed.as_millis() as u64,
                    error = %message,
                    "Retraining failed"
                );
                RetrainOutcome::Failed
            }
        };
        self.metrics.record_retrain(trigger.as_str(), outcome.as_str());
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("retrain callback panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("retrain callback panicked: {s}")
    } else {
        "retrain callback panicked".to_string()
    }
}

/// Periodic + event-driven retrain trigger
///
/// Event-driven retrains run synchronously on the thread calling
/// [`record_event`](Self::record_event); periodic ones run on Tokio's
/// blocking pool, driven by a timer task spawned at construction.
pub struct RetrainScheduler {
    inner: Arc<Inner>,
    config: RetrainConfig,
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RetrainScheduler {
    /// Build the scheduler and start the periodic timer if one is configured.
    ///
    /// A periodic interval needs a Tokio runtime to host the timer task.
    pub fn new<F>(config: RetrainConfig, callback: F) -> Result<Self, ConfigError>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        config.validate()?;

        let events = match config.event_trigger() {
            Some((threshold, window)) => Some(EventTrigger {
                counter: SlidingWindowCounter::new(window)?,
                threshold,
            }),
            None => {
                if config.event_threshold.is_some() || config.event_window.is_some() {
                    warn!(
                        event_threshold = ?config.event_threshold,
                        event_window = ?config.event_window,
                        "Event trigger needs both a threshold and a window, event-driven retrain disabled"
                    );
                }
                None
            }
        };

        let inner = Arc::new(Inner {
            callback: Arc::new(callback),
            gate: Mutex::new(Gate {
                state: RetrainState::Idle,
                shut_down: false,
                stats: RetrainStats::default(),
            }),
            events,
            metrics: MonitorMetrics::new(),
        });

        let (stop_tx, timer) = match config.periodic_interval {
            Some(interval) => {
                let handle =
                    Handle::try_current().map_err(|_| ConfigError::NoRuntime { interval })?;
                let first_tick = tokio::time::Instant::now().checked_add(interval).ok_or_else(|| {
                    ConfigError::InvalidWindow {
                        name: "periodic_interval",
                        value: format!("{interval:?}"),
                    }
                })?;
                let (tx, rx) = broadcast::channel(1);
                let task = handle.spawn(run_periodic(Arc::clone(&inner), first_tick, interval, rx));
                info!(
                    interval_secs = interval.as_secs_f64(),
                    "Scheduled periodic retrain"
                );
                (Some(tx), Some(task))
            }
            None => (None, None),
        };

        if config.is_inert() {
            info!("RetrainScheduler has no triggers configured and will never fire");
        }
        info!(
            event_threshold = ?config.event_threshold,
            event_window = ?config.event_window,
            "RetrainScheduler started"
        );

        Ok(Self {
            inner,
            config,
            stop_tx: Mutex::new(stop_tx),
            timer: Mutex::new(timer),
        })
    }

    /// Configuration the scheduler was built with
    pub fn config(&self) -> &RetrainConfig {
        &self.config
    }

    /// Report one anomaly event. When the event threshold is reached the
    /// ledger is cleared in the same step and a retrain fires on this
    /// thread; the cleared ledger stays cleared whether or not the callback
    /// actually ran.
    ///
    /// Returns `None` when nothing fired, including after shutdown.
    pub fn record_event(&self) -> Option<RetrainOutcome> {
        self.record_event_at(Instant::now())
    }

    /// Same as [`record_event`](Self::record_event) at an explicit instant.
    pub fn record_event_at(&self, now: Instant) -> Option<RetrainOutcome> {
        let events = self.inner.events.as_ref()?;
        if self.inner.is_shut_down() {
            return None;
        }

        let count = events
            .counter
            .record_and_take(RETRAIN_EVENT_KEY, now, events.threshold)?;

        info!(
            event = "retrain_triggered",
            key = RETRAIN_EVENT_KEY,
            window = ?events.counter.window(),
            threshold = events.threshold,
            count = count,
            "Event-based retrain triggered"
        );
        Some(self.inner.fire(Trigger::EventThreshold))
    }

    /// Fire a retrain immediately, subject to the same exclusion rules.
    pub fn trigger_now(&self) -> RetrainOutcome {
        self.inner.fire(Trigger::Manual)
    }

    /// Events currently counted toward the threshold
    pub fn event_count(&self) -> usize {
        self.inner
            .events
            .as_ref()
            .map(|events| events.counter.count(RETRAIN_EVENT_KEY, Instant::now()))
            .unwrap_or(0)
    }

    /// Whether a retrain is currently running
    pub fn state(&self) -> RetrainState {
        self.inner.gate().state
    }

    /// Snapshot of the retrain history counters
    pub fn stats(&self) -> RetrainStats {
        self.inner.gate().stats.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Stop the periodic timer and refuse every later trigger.
    ///
    /// A retrain already running is left to finish. Safe to call repeatedly
    /// and when no timer was configured.
    pub fn shutdown(&self) {
        let first = {
            let mut gate = self.inner.gate();
            !std::mem::replace(&mut gate.shut_down, true)
        };

        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = stop_tx {
            // the timer task may already be gone if its runtime shut down
            let _ = tx.send(());
        }

        if first {
            info!("RetrainScheduler stopped");
        }
    }

    /// Wait for the periodic timer task to exit after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                warn!(error = %e, "Periodic retrain timer ended abnormally");
            }
        }
    }
}

impl Drop for RetrainScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_periodic(
    inner: Arc<Inner>,
    first_tick: tokio::time::Instant,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let inner = Arc::clone(&inner);
                let fired = tokio::task::spawn_blocking(move || inner.fire(Trigger::Periodic)).await;
                if let Err(e) = fired {
                    warn!(error = %e, "Periodic retrain task failed to join");
                }
            }
            _ = shutdown.recv() => {
                debug!("Periodic retrain timer stopped");
                break;
            }
        }
    }
}
