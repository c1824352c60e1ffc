//! Explicit before/after hooks around a detection run
//!
//! The caller composes a [`HookChain`] and brackets each run with
//! [`HookChain::before_run`] and [`HookChain::after_run`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::observability::{MonitorMetrics, StructuredLogger};

/// Summary of one detection run handed to hooks when it ends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Anomalies the detection loop handed over
    pub anomalies: usize,
    /// Alerts that survived filtering
    pub forwarded: usize,
    pub duration: Duration,
    /// Set when the run ended with an error
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub trait RunHook: Send + Sync {
    fn before_run(&self) {}
    fn after_run(&self, report: &RunReport);
}

/// Ordered set of hooks; `before_run` runs front to back, `after_run` back
/// to front so hooks nest.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn RunHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl RunHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Notify hooks that a run is starting and return its start instant.
    pub fn before_run(&self) -> Instant {
        for hook in &self.hooks {
            hook.before_run();
        }
        Instant::now()
    }

    pub fn after_run(&self, report: &RunReport) {
        for hook in self.hooks.iter().rev() {
            hook.after_run(report);
        }
    }
}

/// Feeds run latency, anomaly and error counts into Prometheus
#[derive(Clone, Default)]
pub struct MetricsHook {
    metrics: MonitorMetrics,
}

impl MetricsHook {
    pub fn new(metrics: MonitorMetrics) -> Self {
        Self { metrics }
    }
}

impl RunHook for MetricsHook {
    fn after_run(&self, report: &RunReport) {
        self.metrics.observe_run_latency(report.duration);
        self.metrics.inc_anomalies(report.anomalies as u64);
        if report.is_success() {
            self.metrics.set_last_run_now();
        } else {
            self.metrics.inc_run_errors();
        }
    }
}

/// Logs a summary line per run
pub struct LoggingHook {
    logger: StructuredLogger,
}

impl LoggingHook {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }
}

impl RunHook for LoggingHook {
    fn after_run(&self, report: &RunReport) {
        self.logger
            .log_batch(report.anomalies, report.forwarded, report.duration);
        if let Some(error) = &report.error {
            self.logger.log_delivery_failure(report.forwarded, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RunHook for Recorder {
        fn before_run(&self) {
            self.log.lock().unwrap().push(format!("before:{}", self.name));
        }

        fn after_run(&self, report: &RunReport) {
            self.log
                .lock()
                .unwrap()
                .push(format!("after:{}:{}", self.name, report.anomalies));
        }
    }

    #[test]
    fn test_hooks_nest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChain::new()
            .with(Recorder {
                name: "outer",
                log: Arc::clone(&log),
            })
            .with(Recorder {
                name: "inner",
                log: Arc::clone(&log),
            });

        let started = chain.before_run();
        chain.after_run(&RunReport {
            anomalies: 3,
            forwarded: 1,
            duration: started.elapsed(),
            error: None,
        });

        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:outer", "before:inner", "after:inner:3", "after:outer:3"]
        );
    }

    #[test]
    fn test_metrics_and_logging_hooks_accept_failed_runs() {
        let chain = HookChain::new()
            .with(MetricsHook::new(MonitorMetrics::new()))
            .with(LoggingHook::new(StructuredLogger::new("test")));
        assert_eq!(chain.len(), 2);

        chain.before_run();
        chain.after_run(&RunReport {
            anomalies: 2,
            forwarded: 2,
            duration: Duration::from_millis(4),
            error: Some("sink unreachable".to_string()),
        });
    }
}
