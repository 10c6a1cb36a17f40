pub mod products;
pub mod webhooks;
pub mod imports;

use axum::Router;
use crate::state::AppState;

pub fn create_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(products::routes())
        .merge(webhooks::routes())
        .merge(imports::routes(state.upload_limiter.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::store::MemoryStore;
    use crate::test_support::WebhookSink;

    const BOUNDARY: &str = "catalog-test-boundary";

    fn app(upload_dir: &std::path::Path, max_upload_bytes: u64) -> Router {
        app_with_rate(upload_dir, max_upload_bytes, 0)
    }

    fn app_with_rate(upload_dir: &std::path::Path, max_upload_bytes: u64, per_minute: u32) -> Router {
        let dir = upload_dir.display().to_string();
        let limit = max_upload_bytes.to_string();
        let rate = per_minute.to_string();
        let config = Config::from_lookup(|key| match key {
            "UPLOAD_DIR" => Some(dir.clone()),
            "MAX_UPLOAD_BYTES" => Some(limit.clone()),
            "UPLOAD_RATE_PER_MINUTE" => Some(rate.clone()),
            "IMPORT_CHUNK_SIZE" => Some("2".to_string()),
            _ => None,
        })
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), store, config).unwrap();
        create_router(&state).with_state(state)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn upload(file_name: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n{contents}\r\n--{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn product_crud_and_duplicate_sku() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), 1024);

        let body = json!({"sku": "A-1", "name": "Anvil", "description": "Heavy"});
        let response = app.clone().oneshot(json_request("POST", "/products", body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["sku"], "A-1");
        assert_eq!(created["is_active"], true);

        let response = app.clone().oneshot(json_request("POST", "/products", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "Product with SKU 'A-1' already exists");

        let id = created["id"].as_i64().unwrap();
        let response = app
            .clone()
            .oneshot(json_request("PUT", &format!("/products/{id}"), json!({"is_active": false})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["is_active"], false);

        let response = app.clone().oneshot(get("/products?search=anv&page=1&limit=10")).await.unwrap();
        let page = body_json(response).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["data"][0]["name"], "Anvil");

        let response = app
            .clone()
            .oneshot(json_request("POST", "/products/batch-delete", json!({"ids": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/products/batch-delete", json!({"ids": [id, 999]})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["deleted_count"], 1);

        let response = app.oneshot(get(&format!("/products/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_sku_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), 1024)
            .oneshot(json_request("POST", "/products", json!({"sku": "  ", "name": "x"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_is_imported_in_the_background() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), 4096);

        let csv = "sku,name,description\nA-1,Anvil,Heavy\nB-2,Bolt,\n,Missing sku,\nC-3,Clamp,Grips\n";
        let response = app.clone().oneshot(upload("products.csv", csv)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let accepted = body_json(response).await;
        assert_eq!(accepted["status"], "processing");
        let task_id = accepted["task_id"].as_str().unwrap().to_string();

        let mut task = Value::Null;
        for _ in 0..200 {
            let response = app.clone().oneshot(get(&format!("/tasks/{task_id}"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            task = body_json(response).await;
            if task["status"] == "completed" || task["status"] == "failed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(task["status"], "completed");
        assert_eq!(task["result"]["created"], 3);
        assert_eq!(task["result"]["skipped"], 1);
        assert_eq!(task["progress"]["current"], 4);
        assert_eq!(task["errors"][0]["row"], 4);

        let response = app.oneshot(get("/products?limit=10")).await.unwrap();
        assert_eq!(body_json(response).await["total"], 3);
    }

    #[tokio::test]
    async fn upload_rejects_non_csv_and_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), 32);

        let response = app.clone().oneshot(upload("products.xlsx", "sku,name\n")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Only CSV files are allowed");

        let big = format!("sku,name\n{}", "A-1,Anvil\n".repeat(10));
        let response = app.oneshot(upload("products.csv", &big)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn sixth_upload_within_a_minute_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with_rate(dir.path(), 4096, 5);

        let mut statuses = Vec::new();
        for i in 0..6 {
            let response = app
                .clone()
                .oneshot(upload(&format!("batch-{i}.csv"), "sku,name\nA-1,Anvil\n"))
                .await
                .unwrap();
            statuses.push(response.status());
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                assert!(response.headers().contains_key("retry-after"));
                assert!(body_json(response).await["error"]
                    .as_str()
                    .unwrap()
                    .starts_with("Rate limit exceeded"));
            }
        }

        assert_eq!(&statuses[..5], &[StatusCode::OK; 5]);
        assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);

        // Other routes are not limited.
        let response = app.oneshot(get("/products")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), 1024)
            .oneshot(get("/tasks/7b7c1f7e-9a3e-4d1c-8a51-0d1f3e5b8c2a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhooks_validate_and_test_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), 1024);
        let sink = WebhookSink::start(StatusCode::OK).await;

        let response = app
            .clone()
            .oneshot(json_request("POST", "/webhooks", json!({"url": sink.url, "event_type": "product.deleted"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/webhooks", json!({"url": "ftp://example.com/hook"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/webhooks", json!({"url": sink.url})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["event_type"], "import.completed");

        let response = app
            .clone()
            .oneshot(json_request("POST", "/webhooks/test", json!({"url": sink.url})))
            .await
            .unwrap();
        let result = body_json(response).await;
        assert_eq!(result["success"], true);
        assert_eq!(result["status_code"], 200);
        assert_eq!(sink.received()[0]["event_type"], "webhook.test");

        let response = app.oneshot(get("/webhooks")).await.unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }
}
