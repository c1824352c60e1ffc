//! Delivery of surviving alerts
//!
//! The pipeline only decides what survives; a sink ships it. The
//! Alertmanager client posts the batch to `/api/v1/alerts`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::health::DeliveryStatus;
use crate::models::Alert;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alerts: &[Alert]) -> Result<()>;

    fn name(&self) -> &str;
}

/// Client for Prometheus Alertmanager's alert API
pub struct AlertmanagerSink {
    client: Client,
    endpoint: Url,
}

impl AlertmanagerSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let endpoint = format!("{}/api/v1/alerts", base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint).context("Invalid Alertmanager URL")?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(endpoint = %endpoint, "AlertmanagerSink initialized");
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AlertSink for AlertmanagerSink {
    async fn send(&self, alerts: &[Alert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(alerts)
            .send()
            .await
            .context("Failed to send alerts to Alertmanager")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Alertmanager error ({}): {}", status, body);
        }

        info!(alerts = alerts.len(), "Sent alerts to Alertmanager");
        Ok(())
    }

    fn name(&self) -> &str {
        "alertmanager"
    }
}

/// Sink that only logs, used when no Alertmanager is configured
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, alerts: &[Alert]) -> Result<()> {
        for alert in alerts {
            info!(
                event = "alert",
                labels = ?alert.labels,
                annotations = ?alert.annotations,
                "Alert forwarded"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Send through `sink` and record the result on `status`.
pub async fn deliver(sink: &dyn AlertSink, alerts: &[Alert], status: &DeliveryStatus) -> Result<()> {
    match sink.send(alerts).await {
        Ok(()) => {
            debug!(sink = sink.name(), alerts = alerts.len(), "Delivery succeeded");
            status.record_success();
            Ok(())
        }
        Err(e) => {
            status.record_failure(format!("{e:#}"));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn alert(name: &str) -> Alert {
        Alert::with_labels([("alertname", name), ("severity", "warning")])
            .annotate("summary", "Resource usage anomaly")
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let sink = AlertmanagerSink::new("http://alertmanager:9093/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            sink.endpoint().as_str(),
            "http://alertmanager:9093/api/v1/alerts"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(AlertmanagerSink::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_posts_alert_array() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/alerts")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!([
                {"labels": {"alertname": "AnomalyDetected"}}
            ])))
            .with_status(200)
            .create_async()
            .await;

        let sink = AlertmanagerSink::new(&server.url(), Duration::from_secs(5)).unwrap();
        let status = DeliveryStatus::default();
        deliver(&sink, &[alert("AnomalyDetected")], &status)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(status.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/alerts")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let sink = AlertmanagerSink::new(&server.url(), Duration::from_secs(5)).unwrap();
        let status = DeliveryStatus::default();
        let err = deliver(&sink, &[alert("a")], &status).await.unwrap_err();

        assert!(err.to_string().contains("500"));
        assert_eq!(status.consecutive_failures(), 1);
        assert!(status.last_error().unwrap().contains("internal error"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/alerts")
            .expect(0)
            .create_async()
            .await;

        let sink = AlertmanagerSink::new(&server.url(), Duration::from_secs(5)).unwrap();
        sink.send(&[]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        let status = DeliveryStatus::default();
        deliver(&LogSink, &[alert("a"), alert("b")], &status)
            .await
            .unwrap();
        assert_eq!(LogSink.name(), "log");
    }
}
