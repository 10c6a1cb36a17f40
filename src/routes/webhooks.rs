use axum::{
    routing::{get, post, put},
    Router,
};
use crate::handlers::webhook::{
    create_webhook, delete_webhook, get_deliveries, get_webhooks, test_webhook, update_webhook,
};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks", get(get_webhooks).post(create_webhook))
        .route("/webhooks/test", post(test_webhook))
        .route("/webhooks/{id}", put(update_webhook).delete(delete_webhook))
        .route("/webhooks/{id}/deliveries", get(get_deliveries))
}
