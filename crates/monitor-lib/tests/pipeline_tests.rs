//! End-to-end tests for the suppression pipeline feeding the retrain scheduler

use monitor_lib::{
    suppression::Verdict, Alert, AlertFilterPipeline, Deduplicator, FlappingSuppressor,
    MuteList, MuteRule, RetrainConfig, RetrainOutcome, RetrainScheduler,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn build_pipeline(
    dedup: Duration,
    flap_window: Duration,
    flap_threshold: usize,
) -> AlertFilterPipeline {
    AlertFilterPipeline::new(
        MuteList::new(vec![MuteRule::new([
            ("alertname", "mute"),
            ("severity", "info"),
        ])])
        .unwrap(),
        Deduplicator::new(dedup).unwrap(),
        FlappingSuppressor::new(flap_window, flap_threshold).unwrap(),
    )
}

#[test]
fn test_filter_alerts_end_to_end() {
    let pipeline = build_pipeline(Duration::from_secs(10), Duration::from_secs(10), 10);
    let alerts = vec![
        Alert::with_labels([("alertname", "a"), ("severity", "warn")]),
        Alert::with_labels([("alertname", "mute"), ("severity", "info")]),
    ];

    let filtered = pipeline.filter(alerts);

    assert_eq!(
        filtered,
        vec![Alert::with_labels([("alertname", "a"), ("severity", "warn")])]
    );
}

#[test]
fn test_flapping_identity_escalates_across_batches() {
    // dedup 1s, flapping = 3 fresh occurrences inside 60s
    let pipeline = build_pipeline(Duration::from_secs(1), Duration::from_secs(60), 3);
    let start = Instant::now();
    let batch = || vec![Alert::with_labels([("alertname", "disk"), ("instance", "node01")])];

    let forwarded: Vec<usize> = (0..6u64)
        .map(|i| {
            pipeline
                .filter_at(batch(), start + Duration::from_secs(i * 2))
                .len()
        })
        .collect();

    assert_eq!(forwarded, vec![1, 1, 0, 0, 0, 0]);
}

#[test]
fn test_survivors_drive_event_retrain() {
    let pipeline = build_pipeline(Duration::from_secs(30), Duration::from_secs(30), 100);
    let retrains = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&retrains);
    let scheduler = RetrainScheduler::new(
        RetrainConfig::event_driven(3, Duration::from_secs(600)),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
    .unwrap();

    let batch: Vec<Alert> = ["cpu", "mem", "cpu", "mute", "net", "disk"]
        .iter()
        .map(|name| Alert::with_labels([("alertname", *name), ("severity", "info")]))
        .collect();

    let survivors = pipeline.filter(batch);
    assert_eq!(survivors.len(), 4);

    let outcomes: Vec<_> = survivors.iter().map(|_| scheduler.record_event()).collect();
    assert_eq!(
        outcomes,
        vec![None, None, Some(RetrainOutcome::Completed), None]
    );
    assert_eq!(retrains.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.event_count(), 1);

    scheduler.shutdown();
    scheduler.shutdown();
    assert_eq!(retrains.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pipeline_is_shareable_across_threads() {
    let pipeline = Arc::new(build_pipeline(
        Duration::from_secs(60),
        Duration::from_secs(60),
        100,
    ));
    let now = Instant::now();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            std::thread::spawn(move || {
                let alert = Alert::with_labels([("alertname", "shared")]);
                pipeline.evaluate_at(&alert, now)
            })
        })
        .collect();

    let verdicts: Vec<Verdict> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let forwarded = verdicts.iter().filter(|v| v.is_forwarded()).count();
    assert_eq!(forwarded, 1);
    assert_eq!(
        verdicts.iter().filter(|v| **v == Verdict::Duplicate).count(),
        3
    );
}
