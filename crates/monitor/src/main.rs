//! Anomaly monitor - alert suppression and model retrain daemon
//!
//! Reads batches of alert candidates (one JSON document per line) from
//! stdin, filters them through the suppression pipeline, forwards the
//! survivors and triggers model retraining periodically or on bursts of
//! anomalies.

use anyhow::{Context, Result};
use monitor_lib::{
    health::{components, DeliveryStatus, HealthRegistry},
    instrument::{HookChain, LoggingHook, MetricsHook},
    sink::{AlertSink, AlertmanagerSink, LogSink},
    AlertFilterPipeline, MonitorMetrics, RetrainScheduler, StructuredLogger,
};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod runner;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting anomaly-monitor");

    let settings = config::load()?;
    let sweep_interval = settings
        .sweep_interval()
        .context("Invalid housekeeping settings")?;
    let alertmanager_timeout = settings
        .alertmanager_timeout()
        .context("Invalid alert sink settings")?;
    info!(pipeline = %settings.pipeline_name, "Monitor configured");

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(settings.pipeline_name.clone());

    let pipeline = Arc::new(
        settings
            .build_pipeline()
            .context("Invalid suppression settings")?,
    );
    let retrain_config = settings
        .retrain_config()
        .context("Invalid retrain settings")?;
    let periodic_retrain = retrain_config.periodic_interval.is_some();
    let scheduler = Arc::new(
        RetrainScheduler::new(retrain_config, retrain_callback(settings.retrain_command.clone()))
            .context("Failed to start retrain scheduler")?,
    );

    let sink: Arc<dyn AlertSink> = match settings.alertmanager_url.as_deref() {
        Some(url) => Arc::new(AlertmanagerSink::new(url, alertmanager_timeout)?),
        None => Arc::new(LogSink),
    };
    info!(sink = sink.name(), "Alert sink configured");
    let delivery = Arc::new(DeliveryStatus::default());

    let health_registry = HealthRegistry::new()
        .register(components::RETRAIN_SCHEDULER, scheduler.clone())
        .register(components::ALERT_SINK, delivery.clone());

    let hooks = HookChain::new()
        .with(MetricsHook::new(metrics.clone()))
        .with(LoggingHook::new(logger.clone()));

    logger.log_startup(
        MONITOR_VERSION,
        pipeline.mute_list().len(),
        periodic_retrain,
    );

    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweep_handle = spawn_sweeper(
        Arc::clone(&pipeline),
        sweep_interval,
        logger.clone(),
        metrics.clone(),
        shutdown_tx.subscribe(),
    )?;

    health_registry.set_ready(true);

    let runner = runner::Runner::new(
        Arc::clone(&pipeline),
        Arc::clone(&scheduler),
        sink,
        delivery,
        hooks,
    )
    .report_raw_anomalies(settings.report_raw_anomalies);

    let reason = tokio::select! {
        result = runner.run(BufReader::new(tokio::io::stdin())) => match result {
            Ok(batches) => {
                info!(batches = batches, "Input closed");
                "input closed"
            }
            Err(e) => {
                error!(error = %e, "Failed to read alert input");
                "input error"
            }
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            "SIGINT received"
        }
    };

    health_registry.set_ready(false);
    logger.log_shutdown(reason);

    let _ = shutdown_tx.send(());
    scheduler.shutdown();
    scheduler.join().await;
    if let Err(e) = sweep_handle.await {
        warn!(error = %e, "Sweep task ended abnormally");
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Retrain callback running the configured shell command, or a no-op that
/// only logs when none is configured.
fn retrain_callback(command: Option<String>) -> impl Fn() -> Result<()> + Send + Sync + 'static {
    move || {
        let Some(command) = command.as_deref() else {
            info!("No retrain command configured, skipping retrain");
            return Ok(());
        };

        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .with_context(|| format!("Failed to spawn retrain command `{command}`"))?;

        if !status.success() {
            anyhow::bail!("Retrain command `{command}` exited with {status}");
        }
        Ok(())
    }
}

/// Periodically drop suppression state for identities that went quiet.
fn spawn_sweeper(
    pipeline: Arc<AlertFilterPipeline>,
    period: Duration,
    logger: StructuredLogger,
    metrics: MonitorMetrics,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>> {
    let first_sweep = tokio::time::Instant::now()
        .checked_add(period)
        .with_context(|| format!("Sweep interval {period:?} is out of range"))?;

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(first_sweep, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = pipeline.sweep_idle(Instant::now());
                    let remaining = pipeline.tracked_keys();
                    metrics.set_suppression_keys(remaining);
                    logger.log_sweep(removed, remaining);
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrain_callback_without_command_is_noop() {
        assert!(retrain_callback(None)().is_ok());
    }

    #[test]
    fn test_retrain_callback_runs_command() {
        assert!(retrain_callback(Some("true".into()))().is_ok());

        let err = retrain_callback(Some("exit 3".into()))().unwrap_err();
        assert!(err.to_string().contains("exit 3"));
    }
}
