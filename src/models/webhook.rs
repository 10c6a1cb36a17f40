use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// The only event subscribers can register for.
pub const IMPORT_COMPLETED: &str = "import.completed";

#[derive(Debug, Clone, FromRow)]
pub struct Webhook {
    pub id: i64,
    pub url: String,
    pub event_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub url: String,
    pub event_type: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookChanges {
    pub url: Option<String>,
    pub event_type: Option<String>,
    pub is_active: Option<bool>,
}

/// One POST attempt to one webhook for one import task.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub webhook_id: i64,
    pub task_id: Uuid,
    pub attempt: i32,
    pub success: bool,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryAttempt {
    pub webhook_id: i64,
    pub task_id: Uuid,
    pub attempt: i32,
    pub success: bool,
    pub status_code: Option<i32>,
    pub error: Option<String>,
}
