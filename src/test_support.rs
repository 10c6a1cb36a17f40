// Shared fixtures for the unit tests.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

type Received = Arc<Mutex<Vec<Value>>>;

/// Local HTTP endpoint that records every JSON body POSTed to it and
/// answers with a fixed status.
pub struct WebhookSink {
    pub url: String,
    received: Received,
}

impl WebhookSink {
    pub async fn start(status: StatusCode) -> Self {
        Self::start_delayed(status, Duration::ZERO).await
    }

    /// Like [`WebhookSink::start`], but each request is held for `delay`
    /// before it is answered.
    pub async fn start_delayed(status: StatusCode, delay: Duration) -> Self {
        let received: Received = Arc::default();
        let app = Router::new()
            .route("/hook", post(record))
            .with_state((received.clone(), status, delay));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/hook"),
            received,
        }
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

async fn record(
    State((received, status, delay)): State<(Received, StatusCode, Duration)>,
    Json(body): Json<Value>,
) -> StatusCode {
    received.lock().unwrap().push(body);
    tokio::time::sleep(delay).await;
    status
}

/// URL of a port nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/hook")
}

pub fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
