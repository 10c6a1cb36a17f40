// src/dtos/webhook.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::webhook::{DeliveryAttempt, Webhook};

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub event_type: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub event_type: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TestWebhookRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: i64,
    pub url: String,
    pub event_type: String,
    pub is_active: bool,
    pub created_at: String,
}

impl From<Webhook> for WebhookResponse {
    fn from(webhook: Webhook) -> Self {
        Self {
            id: webhook.id,
            url: webhook.url,
            event_type: webhook.event_type,
            is_active: webhook.is_active,
            created_at: webhook.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub task_id: Uuid,
    pub attempt: i32,
    pub success: bool,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub attempted_at: String,
}

impl From<DeliveryAttempt> for DeliveryResponse {
    fn from(attempt: DeliveryAttempt) -> Self {
        Self {
            task_id: attempt.task_id,
            attempt: attempt.attempt,
            success: attempt.success,
            status_code: attempt.status_code,
            error: attempt.error,
            attempted_at: attempt.attempted_at.to_rfc3339(),
        }
    }
}
