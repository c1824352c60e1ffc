//! Alert filter pipeline
//!
//! Checks run in a fixed order and stop at the first suppressing one:
//! mute, then deduplicate, then flapping. Muted alerts never reach the
//! dedup/flap bookkeeping, and duplicates never reach the flap counter.

use std::time::Instant;
use tracing::{debug, info};

use super::{Deduplicator, FlappingSuppressor, MuteList};
use crate::models::{Alert, DEFAULT_IDENTITY_LABEL};
use crate::observability::MonitorMetrics;

/// Outcome of running one alert through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Muted { rule: usize },
    Duplicate,
    Flapping,
}

impl Verdict {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Verdict::Forward)
    }

    /// Metric label for suppressed verdicts
    pub fn reason(&self) -> &'static str {
        match self {
            Verdict::Forward => "forwarded",
            Verdict::Muted { .. } => "muted",
            Verdict::Duplicate => "deduplicated",
            Verdict::Flapping => "flapping",
        }
    }
}

/// Owns all suppression state for one detection pipeline
pub struct AlertFilterPipeline {
    mute_list: MuteList,
    deduplicator: Deduplicator,
    flapping: FlappingSuppressor,
    identity_label: String,
    metrics: MonitorMetrics,
}

impl AlertFilterPipeline {
    pub fn new(
        mute_list: MuteList,
        deduplicator: Deduplicator,
        flapping: FlappingSuppressor,
    ) -> Self {
        Self {
            mute_list,
            deduplicator,
            flapping,
            identity_label: DEFAULT_IDENTITY_LABEL.to_string(),
            metrics: MonitorMetrics::new(),
        }
    }

    /// Use a label other than `alertname` as the suppression key
    pub fn with_identity_label(mut self, label: impl Into<String>) -> Self {
        self.identity_label = label.into();
        self
    }

    pub fn identity_label(&self) -> &str {
        &self.identity_label
    }

    /// Decide the fate of a single alert, updating suppression state.
    pub fn evaluate_at(&self, alert: &Alert, now: Instant) -> Verdict {
        let key = alert.identity(&self.identity_label);

        if let Some((rule, _)) = self.mute_list.matching_rule(&alert.labels) {
            info!(event = "muted", key = %key, rule = rule, "Muted alert");
            return Verdict::Muted { rule };
        }
        if self.deduplicator.is_duplicate_at(key, now) {
            return Verdict::Duplicate;
        }
        if self.flapping.should_suppress_at(key, now) {
            return Verdict::Flapping;
        }
        Verdict::Forward
    }

    pub fn filter(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        self.filter_at(alerts, Instant::now())
    }

    /// Filter a batch, keeping survivors in input order.
    pub fn filter_at(&self, alerts: Vec<Alert>, now: Instant) -> Vec<Alert> {
        let received = alerts.len();
        self.metrics.inc_received(received as u64);

        let survivors: Vec<Alert> = alerts
            .into_iter()
            .filter(|alert| {
                let verdict = self.evaluate_at(alert, now);
                if !verdict.is_forwarded() {
                    self.metrics.inc_suppressed(verdict.reason());
                }
                verdict.is_forwarded()
            })
            .collect();

        self.metrics.inc_forwarded(survivors.len() as u64);
        self.metrics.set_suppression_keys(self.tracked_keys());
        debug!(
            received = received,
            forwarded = survivors.len(),
            "Filtered alert batch"
        );
        survivors
    }

    /// Drop dedup/flap state for identities with no recent activity.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let removed = self.deduplicator.sweep_idle(now) + self.flapping.sweep_idle(now);
        self.metrics.set_suppression_keys(self.tracked_keys());
        removed
    }

    /// Identities tracked across dedup and flap state
    pub fn tracked_keys(&self) -> usize {
        self.deduplicator.tracked_keys() + self.flapping.tracked_keys()
    }

    pub fn mute_list(&self) -> &MuteList {
        &self.mute_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suppression::MuteRule;
    use std::time::Duration;

    fn pipeline(dedup_secs: u64, flap_secs: u64, flap_threshold: usize) -> AlertFilterPipeline {
        AlertFilterPipeline::new(
            MuteList::new(vec![MuteRule::new([
                ("alertname", "mute"),
                ("severity", "info"),
            ])])
            .unwrap(),
            Deduplicator::new(Duration::from_secs(dedup_secs)).unwrap(),
            FlappingSuppressor::new(Duration::from_secs(flap_secs), flap_threshold).unwrap(),
        )
    }

    #[test]
    fn test_filter_drops_muted_alert() {
        let pipeline = pipeline(10, 10, 10);
        let alerts = vec![
            Alert::with_labels([("alertname", "a"), ("severity", "warn")]),
            Alert::with_labels([("alertname", "mute"), ("severity", "info")]),
        ];

        let filtered = pipeline.filter(alerts);

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].label("alertname"), Some("a"));
        assert_eq!(filtered[0].label("severity"), Some("warn"));
    }

    #[test]
    fn test_muted_alerts_do_not_touch_dedup_or_flap_state() {
        let pipeline = pipeline(10, 10, 2);
        let now = Instant::now();
        let muted = Alert::with_labels([("alertname", "mute"), ("severity", "info")]);

        for _ in 0..5 {
            assert_eq!(
                pipeline.evaluate_at(&muted, now),
                Verdict::Muted { rule: 0 }
            );
        }
        assert_eq!(pipeline.tracked_keys(), 0);

        // same identity, different severity: first time seen, so forwarded
        let unmuted = Alert::with_labels([("alertname", "mute"), ("severity", "critical")]);
        assert_eq!(pipeline.evaluate_at(&unmuted, now), Verdict::Forward);
    }

    #[test]
    fn test_duplicates_do_not_feed_flap_counter() {
        // dedup 5s, flap threshold 2 within 60s
        let pipeline = pipeline(5, 60, 2);
        let start = Instant::now();
        let alert = Alert::with_labels([("alertname", "cpu")]);

        assert_eq!(pipeline.evaluate_at(&alert, start), Verdict::Forward);
        for i in 1..=5 {
            assert_eq!(
                pipeline.evaluate_at(&alert, start + Duration::from_secs(i)),
                Verdict::Duplicate
            );
        }
        // past the dedup window: second fresh occurrence hits the flap threshold
        assert_eq!(
            pipeline.evaluate_at(&alert, start + Duration::from_secs(6)),
            Verdict::Flapping
        );
    }

    #[test]
    fn test_missing_identity_pools_under_empty_key() {
        let pipeline = pipeline(10, 10, 10);
        let alerts = vec![
            Alert::with_labels([("severity", "warn")]),
            Alert::with_labels([("instance", "node01")]),
        ];

        let filtered = pipeline.filter(alerts);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].label("severity"), Some("warn"));
    }

    #[test]
    fn test_custom_identity_label() {
        let pipeline = pipeline(10, 10, 10).with_identity_label("instance");
        let alerts = vec![
            Alert::with_labels([("alertname", "a"), ("instance", "node01")]),
            Alert::with_labels([("alertname", "b"), ("instance", "node02")]),
            Alert::with_labels([("alertname", "c"), ("instance", "node01")]),
        ];

        let filtered = pipeline.filter(alerts);
        let names: Vec<_> = filtered.iter().filter_map(|a| a.label("alertname")).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_order_preserved_among_survivors() {
        let pipeline = pipeline(10, 10, 10);
        let alerts: Vec<_> = ["z", "mute", "y", "x", "y"]
            .iter()
            .map(|name| Alert::with_labels([("alertname", *name), ("severity", "info")]))
            .collect();

        let names: Vec<String> = pipeline
            .filter(alerts)
            .iter()
            .filter_map(|a| a.label("alertname").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_sweep_idle_clears_expired_state() {
        let pipeline = pipeline(1, 2, 10);
        let start = Instant::now();

        pipeline.filter_at(vec![Alert::with_labels([("alertname", "a")])], start);
        assert_eq!(pipeline.tracked_keys(), 2);

        assert_eq!(pipeline.sweep_idle(start + Duration::from_secs(3)), 2);
        assert_eq!(pipeline.tracked_keys(), 0);
    }
}
