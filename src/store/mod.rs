// src/store/mod.rs
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::product::{NewProduct, Product, ProductChanges, ProductQuery, ProductRecord};
use crate::models::webhook::{
    DeliveryAttempt, NewDeliveryAttempt, NewWebhook, Webhook, WebhookChanges,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connectivity or pool exhaustion. Worth retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the data itself (constraint, encoding, ...).
    #[error("store rejected write: {0}")]
    Rejected(String),
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::Conflict(db_err.message().to_string())
            }
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub created: u64,
    pub updated: u64,
}

impl UpsertCounts {
    pub fn add(&mut self, other: UpsertCounts) {
        self.created += other.created;
        self.updated += other.updated;
    }
}

/// Product catalog keyed by a unique SKU.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Applies `rows` in order inside a single transaction: either every row
    /// is committed or none is. On a SKU conflict only `name` and
    /// `description` are overwritten.
    async fn upsert_batch(&self, rows: &[ProductRecord]) -> Result<UpsertCounts, StoreError>;

    async fn upsert_one(&self, row: &ProductRecord) -> Result<UpsertCounts, StoreError>;

    /// Returns the requested page plus the total number of matches.
    async fn list_products(&self, query: &ProductQuery) -> Result<(Vec<Product>, u64), StoreError>;

    async fn get_product(&self, id: i64) -> Result<Option<Product>, StoreError>;

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError>;

    async fn create_product(&self, product: &NewProduct) -> Result<Product, StoreError>;

    async fn update_product(
        &self,
        id: i64,
        changes: &ProductChanges,
    ) -> Result<Option<Product>, StoreError>;

    async fn delete_product(&self, id: i64) -> Result<bool, StoreError>;

    async fn delete_products(&self, ids: &[i64]) -> Result<u64, StoreError>;

    async fn delete_all_products(&self) -> Result<u64, StoreError>;
}

/// Subscriber configuration plus the per-attempt delivery log.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn list_webhooks(&self) -> Result<Vec<Webhook>, StoreError>;

    async fn active_webhooks(&self, event_type: &str) -> Result<Vec<Webhook>, StoreError>;

    async fn create_webhook(&self, webhook: &NewWebhook) -> Result<Webhook, StoreError>;

    async fn update_webhook(
        &self,
        id: i64,
        changes: &WebhookChanges,
    ) -> Result<Option<Webhook>, StoreError>;

    async fn delete_webhook(&self, id: i64) -> Result<bool, StoreError>;

    async fn record_delivery(&self, attempt: &NewDeliveryAttempt) -> Result<(), StoreError>;

    async fn list_deliveries(&self, webhook_id: i64) -> Result<Vec<DeliveryAttempt>, StoreError>;
}
