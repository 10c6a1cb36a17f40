// src/store/postgres.rs
use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{CatalogStore, StoreError, UpsertCounts, WebhookStore};
use crate::models::product::{NewProduct, Product, ProductChanges, ProductQuery, ProductRecord};
use crate::models::webhook::{
    DeliveryAttempt, NewDeliveryAttempt, NewWebhook, Webhook, WebhookChanges,
};

// The conflict branch lists the columns it may overwrite. `is_active` is
// deliberately absent.
const UPSERT_PRODUCTS: &str = r#"
    INSERT INTO products (sku, name, description, is_active)
    SELECT sku, name, description, is_active
    FROM UNNEST($1::varchar[], $2::varchar[], $3::text[], $4::bool[])
        AS incoming(sku, name, description, is_active)
    ON CONFLICT (sku) DO UPDATE
        SET name = EXCLUDED.name,
            description = EXCLUDED.description
    RETURNING (xmax = 0) AS inserted"#;

const PRODUCT_COLUMNS: &str = "id, sku, name, description, is_active, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_run(
        tx: &mut Transaction<'_, Postgres>,
        run: &[ProductRecord],
    ) -> Result<UpsertCounts, StoreError> {
        let skus: Vec<&str> = run.iter().map(|r| r.sku.as_str()).collect();
        let names: Vec<&str> = run.iter().map(|r| r.name.as_str()).collect();
        let descriptions: Vec<Option<&str>> = run.iter().map(|r| r.description.as_deref()).collect();
        let actives: Vec<bool> = run.iter().map(|r| r.is_active.unwrap_or(true)).collect();

        let inserted: Vec<bool> = sqlx::query_scalar(UPSERT_PRODUCTS)
            .bind(&skus)
            .bind(&names)
            .bind(&descriptions)
            .bind(&actives)
            .fetch_all(&mut **tx)
            .await?;

        let created = inserted.iter().filter(|i| **i).count() as u64;
        Ok(UpsertCounts {
            created,
            updated: inserted.len() as u64 - created,
        })
    }
}

/// Splits `rows` into consecutive runs in which every SKU appears at most
/// once. Postgres refuses to touch the same row twice in one
/// `INSERT .. ON CONFLICT`, so a repeated SKU starts a new run; executing the
/// runs in order keeps "last occurrence wins".
pub(crate) fn unique_runs(rows: &[ProductRecord]) -> Vec<&[ProductRecord]> {
    let mut runs = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut start = 0;
    for (idx, row) in rows.iter().enumerate() {
        if !seen.insert(row.sku.as_str()) {
            runs.push(&rows[start..idx]);
            seen.clear();
            seen.insert(row.sku.as_str());
            start = idx;
        }
    }
    if start < rows.len() {
        runs.push(&rows[start..]);
    }
    runs
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn upsert_batch(&self, rows: &[ProductRecord]) -> Result<UpsertCounts, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut counts = UpsertCounts::default();
        for run in unique_runs(rows) {
            counts.add(Self::upsert_run(&mut tx, run).await?);
        }
        tx.commit().await?;
        Ok(counts)
    }

    async fn upsert_one(&self, row: &ProductRecord) -> Result<UpsertCounts, StoreError> {
        let mut tx = self.pool.begin().await?;
        let counts = Self::upsert_run(&mut tx, std::slice::from_ref(row)).await?;
        tx.commit().await?;
        Ok(counts)
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<(Vec<Product>, u64), StoreError> {
        let pattern = query.search.as_ref().map(|s| format!("%{s}%"));

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM products
             WHERE $1::text IS NULL OR sku ILIKE $1 OR name ILIKE $1 OR description ILIKE $1",
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE $1::text IS NULL OR sku ILIKE $1 OR name ILIKE $1 OR description ILIKE $1
             ORDER BY id
             LIMIT $2 OFFSET $3"
        ))
        .bind(&pattern)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok((products, total.max(0) as u64))
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>, StoreError> {
        let product =
            sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(product)
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        let product =
            sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1"))
                .bind(sku)
                .fetch_optional(&self.pool)
                .await?;
        Ok(product)
    }

    async fn create_product(&self, product: &NewProduct) -> Result<Product, StoreError> {
        let created = sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (sku, name, description, is_active)
             VALUES ($1, $2, $3, $4) RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_product(
        &self,
        id: i64,
        changes: &ProductChanges,
    ) -> Result<Option<Product>, StoreError> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "UPDATE products SET
             name = COALESCE($1, name),
             description = COALESCE($2, description),
             is_active = COALESCE($3, is_active)
             WHERE id = $4 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&changes.name)
        .bind(&changes.description)
        .bind(changes.is_active)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    async fn delete_product(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_products(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_products(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM products").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WebhookStore for PgStore {
    async fn list_webhooks(&self) -> Result<Vec<Webhook>, StoreError> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            "SELECT id, url, event_type, is_active, created_at FROM webhooks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(webhooks)
    }

    async fn active_webhooks(&self, event_type: &str) -> Result<Vec<Webhook>, StoreError> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            "SELECT id, url, event_type, is_active, created_at FROM webhooks
             WHERE event_type = $1 AND is_active = TRUE ORDER BY id",
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(webhooks)
    }

    async fn create_webhook(&self, webhook: &NewWebhook) -> Result<Webhook, StoreError> {
        let created = sqlx::query_as::<_, Webhook>(
            "INSERT INTO webhooks (url, event_type, is_active) VALUES ($1, $2, $3)
             RETURNING id, url, event_type, is_active, created_at",
        )
        .bind(&webhook.url)
        .bind(&webhook.event_type)
        .bind(webhook.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_webhook(
        &self,
        id: i64,
        changes: &WebhookChanges,
    ) -> Result<Option<Webhook>, StoreError> {
        let webhook = sqlx::query_as::<_, Webhook>(
            "UPDATE webhooks SET
             url = COALESCE($1, url),
             event_type = COALESCE($2, event_type),
             is_active = COALESCE($3, is_active)
             WHERE id = $4 RETURNING id, url, event_type, is_active, created_at",
        )
        .bind(&changes.url)
        .bind(&changes.event_type)
        .bind(changes.is_active)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(webhook)
    }

    async fn delete_webhook(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_delivery(&self, attempt: &NewDeliveryAttempt) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO webhook_deliveries
                (webhook_id, task_id, attempt, success, status_code, error)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(attempt.webhook_id)
        .bind(attempt.task_id)
        .bind(attempt.attempt)
        .bind(attempt.success)
        .bind(attempt.status_code)
        .bind(&attempt.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_deliveries(&self, webhook_id: i64) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let deliveries = sqlx::query_as::<_, DeliveryAttempt>(
            "SELECT id, webhook_id, task_id, attempt, success, status_code, error, attempted_at
             FROM webhook_deliveries WHERE webhook_id = $1 ORDER BY attempted_at, id",
        )
        .bind(webhook_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(deliveries)
    }
}
