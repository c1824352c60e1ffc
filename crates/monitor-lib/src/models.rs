//! Core data models for the anomaly monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label that carries an alert's identity unless configured otherwise
pub const DEFAULT_IDENTITY_LABEL: &str = "alertname";

/// Alert candidate produced by the detection loop, in Alertmanager's shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Labels used for routing, muting and identity
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Free-form details
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "generatorURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub generator_url: Option<String>,
}

impl Alert {
    /// Build an alert from label pairs
    pub fn with_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            annotations: HashMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: None,
        }
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.starts_at = Some(at);
        self
    }

    /// Suppression key for this alert; the empty string when the label is absent
    pub fn identity(&self, identity_label: &str) -> &str {
        self.labels
            .get(identity_label)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Parse one inbound line: either a JSON array of alerts or a single alert
pub fn parse_alert_batch(line: &str) -> serde_json::Result<Vec<Alert>> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|alert| vec![alert])
    }
}
