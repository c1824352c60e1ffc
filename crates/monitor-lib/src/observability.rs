//! Observability infrastructure for the anomaly monitor
//!
//! Provides:
//! - Prometheus metrics (suppression verdicts, retrain outcomes, run latency)
//! - Structured lifecycle logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Buckets for detection run latency (in seconds)
const RUN_LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

/// Buckets for retrain duration (in seconds); retrains may take minutes
const RETRAIN_BUCKETS: &[f64] = &[0.1, 1.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0];

static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    alerts_received: IntCounter,
    alerts_forwarded: IntCounter,
    alerts_suppressed: IntCounterVec,
    suppression_keys: IntGauge,
    retrain_outcomes: IntCounterVec,
    retrain_duration_seconds: Histogram,
    retrain_in_progress: IntGauge,
    run_latency_seconds: Histogram,
    run_errors: IntCounter,
    anomalies_reported: IntCounter,
    last_run_timestamp: Gauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            alerts_received: register_int_counter!(
                "anomaly_monitor_alerts_received_total",
                "Alert candidates submitted to the filter pipeline"
            )
            .expect("Failed to register alerts_received"),

            alerts_forwarded: register_int_counter!(
                "anomaly_monitor_alerts_forwarded_total",
                "Alerts that survived muting, deduplication and flapping checks"
            )
            .expect("Failed to register alerts_forwarded"),

            alerts_suppressed: register_int_counter_vec!(
                "anomaly_monitor_alerts_suppressed_total",
                "Alerts dropped by the filter pipeline",
                &["reason"]
            )
            .expect("Failed to register alerts_suppressed"),

            suppression_keys: register_int_gauge!(
                "anomaly_monitor_suppression_keys",
                "Alert identities currently tracked by suppression state"
            )
            .expect("Failed to register suppression_keys"),

            retrain_outcomes: register_int_counter_vec!(
                "anomaly_monitor_retrains_total",
                "Retrain triggers by trigger source and outcome",
                &["trigger", "outcome"]
            )
            .expect("Failed to register retrain_outcomes"),

            retrain_duration_seconds: register_histogram!(
                "anomaly_monitor_retrain_duration_seconds",
                "Wall time spent in the retrain callback",
                RETRAIN_BUCKETS.to_vec()
            )
            .expect("Failed to register retrain_duration_seconds"),

            retrain_in_progress: register_int_gauge!(
                "anomaly_monitor_retrain_in_progress",
                "1 while a retrain callback is executing"
            )
            .expect("Failed to register retrain_in_progress"),

            run_latency_seconds: register_histogram!(
                "anomaly_monitor_run_latency_seconds",
                "Latency of one detection run (filter, deliver, report)",
                RUN_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register run_latency_seconds"),

            run_errors: register_int_counter!(
                "anomaly_monitor_run_errors_total",
                "Detection runs that ended with an error"
            )
            .expect("Failed to register run_errors"),

            anomalies_reported: register_int_counter!(
                "anomaly_monitor_anomalies_total",
                "Anomalies handed over by the detection loop"
            )
            .expect("Failed to register anomalies_reported"),

            last_run_timestamp: register_gauge!(
                "anomaly_monitor_last_run_timestamp",
                "Unix timestamp of the last completed detection run"
            )
            .expect("Failed to register last_run_timestamp"),
        }
    }
}

/// Handle to the process-wide Prometheus metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MonitorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MonitorMetrics")
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn inc_received(&self, n: u64) {
        self.inner().alerts_received.inc_by(n);
    }

    pub fn inc_forwarded(&self, n: u64) {
        self.inner().alerts_forwarded.inc_by(n);
    }

    pub fn inc_suppressed(&self, reason: &str) {
        self.inner()
            .alerts_suppressed
            .with_label_values(&[reason])
            .inc();
    }

    pub fn set_suppression_keys(&self, keys: usize) {
        self.inner().suppression_keys.set(keys as i64);
    }

    pub fn record_retrain(&self, trigger: &str, outcome: &str) {
        self.inner()
            .retrain_outcomes
            .with_label_values(&[trigger, outcome])
            .inc();
    }

    pub fn observe_retrain_duration(&self, duration: Duration) {
        self.inner()
            .retrain_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn set_retrain_in_progress(&self, running: bool) {
        self.inner().retrain_in_progress.set(i64::from(running));
    }

    pub fn observe_run_latency(&self, duration: Duration) {
        self.inner().run_latency_seconds.observe(duration.as_secs_f64());
    }

    pub fn inc_run_errors(&self) {
        self.inner().run_errors.inc();
    }

    pub fn inc_anomalies(&self, n: u64) {
        self.inner().anomalies_reported.inc_by(n);
    }

    pub fn set_last_run_now(&self) {
        self.inner()
            .last_run_timestamp
            .set(chrono::Utc::now().timestamp() as f64);
    }
}

/// Structured logger for monitor lifecycle events
///
/// Per-decision events (`suppressed`, `deduplicated`, `muted`, `retrain_*`)
/// are emitted by the components themselves; this covers the process and
/// batch level.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    pipeline: String,
}

impl StructuredLogger {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn log_startup(&self, version: &str, mute_rules: usize, periodic_retrain: bool) {
        info!(
            event = "monitor_started",
            pipeline = %self.pipeline,
            version = %version,
            mute_rules = mute_rules,
            periodic_retrain = periodic_retrain,
            "Anomaly monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            pipeline = %self.pipeline,
            reason = %reason,
            "Anomaly monitor shutting down"
        );
    }

    /// Summary of one filtered batch
    pub fn log_batch(&self, received: usize, forwarded: usize, duration: Duration) {
        info!(
            event = "batch_filtered",
            pipeline = %self.pipeline,
            received = received,
            forwarded = forwarded,
            suppressed = received.saturating_sub(forwarded),
            duration_ms = duration.as_millis() as u64,
            "Filtered alert batch"
        );
    }

    pub fn log_delivery_failure(&self, alerts: usize, error: &str) {
        warn!(
            event = "delivery_failed",
            pipeline = %self.pipeline,
            alerts = alerts,
            error = %error,
            "Failed to deliver alerts to sink"
        );
    }

    pub fn log_sweep(&self, removed: usize, remaining: usize) {
        if removed > 0 {
            info!(
                event = "suppression_sweep",
                pipeline = %self.pipeline,
                removed = removed,
                remaining = remaining,
                "Dropped idle suppression keys"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_handles_share_registry() {
        let a = MonitorMetrics::new();
        let b = a.clone();

        a.inc_received(3);
        b.inc_forwarded(1);
        a.inc_suppressed("muted");
        b.record_retrain("periodic", "completed");
        a.observe_retrain_duration(Duration::from_millis(5));
        a.observe_run_latency(Duration::from_millis(2));
        b.set_retrain_in_progress(false);
        b.set_last_run_now();

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "anomaly_monitor_alerts_suppressed_total"));
    }

    #[test]
    fn test_structured_logger_pipeline_name() {
        let logger = StructuredLogger::new("prod-metrics");
        assert_eq!(logger.pipeline(), "prod-metrics");
    }
}
