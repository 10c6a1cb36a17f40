use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use crate::handlers::import::{get_task, upload_csv};
use crate::middleware::rate_limit::{limit_uploads, UploadLimiter};
use crate::state::AppState;

pub fn routes(upload_limiter: Option<UploadLimiter>) -> Router<AppState> {
    // Upload size is enforced while spooling, against MAX_UPLOAD_BYTES.
    let upload = post(upload_csv)
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(upload_limiter, limit_uploads));

    Router::new()
        .route("/upload", upload)
        .route("/tasks/{id}", get(get_task))
}
