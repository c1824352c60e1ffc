//! Configuration surface for the monitor
//!
//! Values arrive in operator-friendly units (seconds, minutes, hours) and as
//! signed numbers, so that negative input reaches validation and is rejected
//! instead of failing to parse or being clamped.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{threshold_from, window_from_secs, ConfigError};
use crate::models::DEFAULT_IDENTITY_LABEL;
use crate::retrain::RetrainConfig;
use crate::suppression::{
    AlertFilterPipeline, Deduplicator, FlappingSuppressor, MuteList, MuteRule,
};

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Name attached to lifecycle logs
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,

    /// Label whose value is the suppression key
    #[serde(default = "default_identity_label")]
    pub identity_label: String,

    /// Flapping window in seconds
    #[serde(default = "default_flap_window_secs")]
    pub flap_window_secs: f64,

    /// Occurrences within the flapping window that count as flapping
    #[serde(default = "default_flap_threshold")]
    pub flap_threshold: i64,

    /// Deduplication cool-down in seconds
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: f64,

    /// Label sets that mute matching alerts unconditionally
    #[serde(default)]
    pub mute_rules: Vec<HashMap<String, String>>,

    /// Periodic retrain interval in hours
    #[serde(default)]
    pub retrain_interval_hours: Option<f64>,

    /// Anomaly events within the retrain window that trigger a retrain
    #[serde(default)]
    pub retrain_event_threshold: Option<i64>,

    /// Retrain event window in minutes
    #[serde(default)]
    pub retrain_event_window_minutes: Option<f64>,

    /// Report every raw anomaly to the retrain scheduler instead of only
    /// the alerts that survived filtering
    #[serde(default)]
    pub report_raw_anomalies: bool,

    /// Shell command run as the retrain callback
    #[serde(default)]
    pub retrain_command: Option<String>,

    /// Alertmanager base URL; alerts are only logged when unset
    #[serde(default)]
    pub alertmanager_url: Option<String>,

    #[serde(default = "default_alertmanager_timeout_secs")]
    pub alertmanager_timeout_secs: u64,

    /// How often idle suppression keys are swept, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Port for health and metrics endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_pipeline_name() -> String {
    "anomaly-detection".to_string()
}

fn default_identity_label() -> String {
    DEFAULT_IDENTITY_LABEL.to_string()
}

fn default_flap_window_secs() -> f64 {
    300.0
}

fn default_flap_threshold() -> i64 {
    3
}

fn default_dedup_window_secs() -> f64 {
    600.0
}

fn default_alertmanager_timeout_secs() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_api_port() -> u16 {
    8000
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            identity_label: default_identity_label(),
            flap_window_secs: default_flap_window_secs(),
            flap_threshold: default_flap_threshold(),
            dedup_window_secs: default_dedup_window_secs(),
            mute_rules: Vec::new(),
            retrain_interval_hours: None,
            retrain_event_threshold: None,
            retrain_event_window_minutes: None,
            report_raw_anomalies: false,
            retrain_command: None,
            alertmanager_url: None,
            alertmanager_timeout_secs: default_alertmanager_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            api_port: default_api_port(),
        }
    }
}

impl MonitorSettings {
    pub fn mute_list(&self) -> Result<MuteList, ConfigError> {
        MuteList::new(
            self.mute_rules
                .iter()
                .cloned()
                .map(MuteRule::from)
                .collect(),
        )
    }

    /// Build the suppression pipeline described by these settings.
    pub fn build_pipeline(&self) -> Result<AlertFilterPipeline, ConfigError> {
        let flap_window = window_from_secs("flap_window", self.flap_window_secs)?;
        let flap_threshold = threshold_from("flap_threshold", self.flap_threshold)?;
        let dedup_window = window_from_secs("dedup_window", self.dedup_window_secs)?;

        Ok(AlertFilterPipeline::new(
            self.mute_list()?,
            Deduplicator::new(dedup_window)?,
            FlappingSuppressor::new(flap_window, flap_threshold)?,
        )
        .with_identity_label(self.identity_label.clone()))
    }

    pub fn retrain_config(&self) -> Result<RetrainConfig, ConfigError> {
        let periodic_interval = self
            .retrain_interval_hours
            .map(|hours| window_from_secs("retrain_interval", hours * 3600.0))
            .transpose()?;
        let event_threshold = self
            .retrain_event_threshold
            .map(|t| threshold_from("retrain_event_threshold", t))
            .transpose()?;
        let event_window = self
            .retrain_event_window_minutes
            .map(|minutes| window_from_secs("retrain_event_window", minutes * 60.0))
            .transpose()?;

        let config = RetrainConfig {
            periodic_interval,
            event_threshold,
            event_window,
        };
        config.validate()?;
        Ok(config)
    }

    /// Housekeeping period for idle suppression keys; zero is rejected.
    pub fn sweep_interval(&self) -> Result<Duration, ConfigError> {
        window_from_secs("sweep_interval", self.sweep_interval_secs as f64)
    }

    /// Per-request Alertmanager timeout; zero is rejected.
    pub fn alertmanager_timeout(&self) -> Result<Duration, ConfigError> {
        window_from_secs("alertmanager_timeout", self.alertmanager_timeout_secs as f64)
    }
}
