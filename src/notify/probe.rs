// src/notify/probe.rs
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use super::DeliveryError;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookTestResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sends a single test event to `url` and reports how it went. Nothing is
/// persisted.
pub async fn probe(client: &reqwest::Client, url: &str) -> WebhookTestResult {
    let payload = json!({
        "event_type": "webhook.test",
        "message": "Test delivery from catalog-importer",
        "timestamp": Utc::now(),
    });

    let started = Instant::now();
    let result = client.post(url).json(&payload).send().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            let status = response.status();
            WebhookTestResult {
                success: status.is_success(),
                status_code: Some(status.as_u16()),
                latency_ms,
                error: (!status.is_success()).then(|| DeliveryError::Status(status.as_u16()).to_string()),
            }
        }
        Err(err) => WebhookTestResult {
            success: false,
            status_code: None,
            latency_ms,
            error: Some(DeliveryError::from(err).to_string()),
        },
    }
}
