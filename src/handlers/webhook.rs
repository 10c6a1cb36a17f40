// src/handlers/webhook.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use reqwest::Url;
use tracing::{info, instrument};

use crate::dtos::webhook::{
    CreateWebhookRequest, DeliveryResponse, TestWebhookRequest, UpdateWebhookRequest,
    WebhookResponse,
};
use crate::error::AppError;
use crate::models::webhook::{NewWebhook, WebhookChanges, IMPORT_COMPLETED};
use crate::notify::{probe, WebhookTestResult};
use crate::state::AppState;

fn validate_url(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
            Ok(raw.to_string())
        }
        _ => Err(AppError::validation("url must be an absolute http(s) URL")),
    }
}

fn validate_event(event_type: &str) -> Result<String, AppError> {
    if event_type == IMPORT_COMPLETED {
        Ok(event_type.to_string())
    } else {
        Err(AppError::validation(format!(
            "Unsupported event_type '{event_type}'; expected '{IMPORT_COMPLETED}'"
        )))
    }
}

// GET /webhooks - List all webhooks
#[instrument(skip(state))]
pub async fn get_webhooks(
    State(state): State<AppState>,
) -> Result<Json<Vec<WebhookResponse>>, AppError> {
    let webhooks = state.webhooks.list_webhooks().await?;
    Ok(Json(webhooks.into_iter().map(WebhookResponse::from).collect()))
}

// POST /webhooks - Register a webhook
#[instrument(skip(state, payload))]
pub async fn create_webhook(
    State(state): State<AppState>,
    Json(payload): Json<CreateWebhookRequest>,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    let webhook = NewWebhook {
        url: validate_url(&payload.url)?,
        event_type: validate_event(payload.event_type.as_deref().unwrap_or(IMPORT_COMPLETED))?,
        is_active: payload.is_active.unwrap_or(true),
    };

    let created = state.webhooks.create_webhook(&webhook).await?;
    info!(id = created.id, url = %created.url, "Webhook registered");
    Ok((StatusCode::CREATED, Json(WebhookResponse::from(created))))
}

// PUT /webhooks/{id} - Update url, event type or active flag
#[instrument(skip(state, payload), fields(id))]
pub async fn update_webhook(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateWebhookRequest>,
) -> Result<Json<WebhookResponse>, AppError> {
    let changes = WebhookChanges {
        url: payload.url.as_deref().map(validate_url).transpose()?,
        event_type: payload.event_type.as_deref().map(validate_event).transpose()?,
        is_active: payload.is_active,
    };

    let webhook = state
        .webhooks
        .update_webhook(id, &changes)
        .await?
        .ok_or_else(|| AppError::not_found("Webhook not found"))?;

    Ok(Json(WebhookResponse::from(webhook)))
}

// DELETE /webhooks/{id} - Remove a webhook and its delivery log
#[instrument(skip(state), fields(id))]
pub async fn delete_webhook(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    if state.webhooks.delete_webhook(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Webhook not found"))
    }
}

// GET /webhooks/{id}/deliveries - Delivery attempts for one webhook
#[instrument(skip(state), fields(id))]
pub async fn get_deliveries(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DeliveryResponse>>, AppError> {
    let deliveries = state.webhooks.list_deliveries(id).await?;
    Ok(Json(deliveries.into_iter().map(DeliveryResponse::from).collect()))
}

// POST /webhooks/test - Send a test event to a URL without registering it
#[instrument(skip(state, payload))]
pub async fn test_webhook(
    State(state): State<AppState>,
    Json(payload): Json<TestWebhookRequest>,
) -> Result<Json<WebhookTestResult>, AppError> {
    let url = validate_url(&payload.url)?;
    let result = probe(state.dispatcher.client(), &url).await;
    info!(%url, success = result.success, latency_ms = result.latency_ms, "Webhook test sent");
    Ok(Json(result))
}
