//! Detection run loop
//!
//! Each input line is one batch of alert candidates from the detection
//! loop. A batch is filtered, survivors are delivered, and anomaly events
//! are reported to the retrain scheduler.

use anyhow::Result;
use monitor_lib::{
    health::DeliveryStatus,
    instrument::{HookChain, RunReport},
    parse_alert_batch,
    sink::{deliver, AlertSink},
    Alert, AlertFilterPipeline, RetrainScheduler,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

pub struct Runner {
    pipeline: Arc<AlertFilterPipeline>,
    scheduler: Arc<RetrainScheduler>,
    sink: Arc<dyn AlertSink>,
    delivery: Arc<DeliveryStatus>,
    hooks: HookChain,
    report_raw_anomalies: bool,
}

impl Runner {
    pub fn new(
        pipeline: Arc<AlertFilterPipeline>,
        scheduler: Arc<RetrainScheduler>,
        sink: Arc<dyn AlertSink>,
        delivery: Arc<DeliveryStatus>,
        hooks: HookChain,
    ) -> Self {
        Self {
            pipeline,
            scheduler,
            sink,
            delivery,
            hooks,
            report_raw_anomalies: false,
        }
    }

    /// Report every candidate to the scheduler, not just survivors
    pub fn report_raw_anomalies(mut self, raw: bool) -> Self {
        self.report_raw_anomalies = raw;
        self
    }

    /// Read batches until the input ends. Returns the number of batches run.
    pub async fn run<R>(&self, input: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut batches = 0;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_alert_batch(line) {
                Ok(alerts) => {
                    self.process_batch(alerts).await;
                    batches += 1;
                }
                Err(e) => warn!(error = %e, "Skipping malformed alert batch"),
            }
        }
        Ok(batches)
    }

    pub async fn process_batch(&self, alerts: Vec<Alert>) -> RunReport {
        let started: Instant = self.hooks.before_run();
        let anomalies = alerts.len();

        let survivors = self.pipeline.filter(alerts);
        let delivered = deliver(self.sink.as_ref(), &survivors, &self.delivery).await;

        let events = if self.report_raw_anomalies {
            anomalies
        } else {
            survivors.len()
        };
        self.report_events(events).await;

        let report = RunReport {
            anomalies,
            forwarded: survivors.len(),
            duration: started.elapsed(),
            error: delivered.err().map(|e| format!("{e:#}")),
        };
        self.hooks.after_run(&report);
        report
    }

    /// An event may run a retrain synchronously, so keep it off the async
    /// workers.
    async fn report_events(&self, events: usize) {
        if events == 0 {
            return;
        }
        let scheduler = Arc::clone(&self.scheduler);
        let reported = tokio::task::spawn_blocking(move || {
            (0..events)
                .filter_map(|_| scheduler.record_event())
                .collect::<Vec<_>>()
        })
        .await;

        match reported {
            Ok(outcomes) => debug!(
                events = events,
                retrains = outcomes.len(),
                "Reported anomaly events"
            ),
            Err(e) => warn!(error = %e, "Anomaly event reporting task failed"),
        }
    }
}
