// src/notify/dispatcher.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::DeliveryError;
use crate::models::import_task::{ImportSummary, ImportTask, TaskStatus};
use crate::models::webhook::{NewDeliveryAttempt, Webhook, IMPORT_COMPLETED};
use crate::store::WebhookStore;

#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Hard limit for one POST, connect included.
    pub timeout: Duration,
    /// 1 means a single attempt per webhook per task.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 1,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Body POSTed to every subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct ImportEvent {
    pub event_type: &'static str,
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: ImportSummary,
    pub timestamp: DateTime<Utc>,
}

impl ImportEvent {
    pub fn from_task(task: &ImportTask) -> Self {
        Self {
            event_type: IMPORT_COMPLETED,
            task_id: task.id,
            status: task.status,
            result: task.summary,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub webhook_id: i64,
    pub attempts: u32,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Fans a terminal import out to the active `import.completed` webhooks.
///
/// Subscribers are read when dispatch runs, so a webhook deactivated or
/// deleted before that point is not called. Every subscriber gets its own
/// delivery; one failing never affects another or the import itself.
#[derive(Clone)]
pub struct Dispatcher {
    webhooks: Arc<dyn WebhookStore>,
    client: reqwest::Client,
    policy: DeliveryPolicy,
}

impl Dispatcher {
    pub fn new(webhooks: Arc<dyn WebhookStore>, policy: DeliveryPolicy) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(concat!("catalog-importer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            webhooks,
            client,
            policy,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Runs [`Dispatcher::notify`] on its own task and returns immediately.
    pub fn dispatch(&self, task: ImportTask) -> JoinHandle<Vec<DeliveryOutcome>> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.notify(&task).await })
    }

    #[instrument(skip_all, fields(task_id = %task.id, status = %task.status))]
    pub async fn notify(&self, task: &ImportTask) -> Vec<DeliveryOutcome> {
        let webhooks = match self.webhooks.active_webhooks(IMPORT_COMPLETED).await {
            Ok(webhooks) => webhooks,
            Err(err) => {
                error!(error = %err, "Failed to load webhooks, skipping notification");
                return Vec::new();
            }
        };
        if webhooks.is_empty() {
            debug!("No active webhooks");
            return Vec::new();
        }

        let event = ImportEvent::from_task(task);
        let mut deliveries = JoinSet::new();
        for webhook in webhooks {
            let dispatcher = self.clone();
            let event = event.clone();
            deliveries.spawn(async move { dispatcher.deliver(&webhook, &event).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "Webhook delivery task aborted"),
            }
        }
        outcomes.sort_by_key(|o| o.webhook_id);
        outcomes
    }

    async fn deliver(&self, webhook: &Webhook, event: &ImportEvent) -> DeliveryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.post(&webhook.url, event).await;
            self.record(webhook.id, event.task_id, attempt, &result).await;

            match result {
                Ok(status) => {
                    info!(webhook_id = webhook.id, url = %webhook.url, status, attempt, "Webhook delivered");
                    return DeliveryOutcome {
                        webhook_id: webhook.id,
                        attempts: attempt,
                        status_code: Some(status),
                        error: None,
                    };
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self
                        .policy
                        .backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(webhook_id = webhook.id, url = %webhook.url, attempt, error = %err, ?delay, "Webhook delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(webhook_id = webhook.id, url = %webhook.url, attempt, error = %err, "Webhook delivery failed");
                    return DeliveryOutcome {
                        webhook_id: webhook.id,
                        attempts: attempt,
                        status_code: err.status_code(),
                        error: Some(err.to_string()),
                    };
                }
            }
        }
    }

    async fn post(&self, url: &str, event: &ImportEvent) -> Result<u16, DeliveryError> {
        let response = self.client.post(url).json(event).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }

    async fn record(&self, webhook_id: i64, task_id: Uuid, attempt: u32, result: &Result<u16, DeliveryError>) {
        let record = NewDeliveryAttempt {
            webhook_id,
            task_id,
            attempt: attempt as i32,
            success: result.is_ok(),
            status_code: match result {
                Ok(status) => Some(i32::from(*status)),
                Err(err) => err.status_code().map(i32::from),
            },
            error: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(err) = self.webhooks.record_delivery(&record).await {
            warn!(webhook_id, error = %err, "Failed to record webhook delivery");
        }
    }
}
