// src/store/memory.rs
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{CatalogStore, StoreError, UpsertCounts, WebhookStore};
use crate::models::product::{NewProduct, Product, ProductChanges, ProductQuery, ProductRecord};
use crate::models::webhook::{
    DeliveryAttempt, NewDeliveryAttempt, NewWebhook, Webhook, WebhookChanges,
};

/// Process-local store used when no `DATABASE_URL` is configured and by the
/// test suite. Holds the same invariants as the Postgres schema: one product
/// per SKU, and upserts never touch `is_active` of an existing row.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    products: BTreeMap<i64, Product>,
    by_sku: HashMap<String, i64>,
    next_product_id: i64,
    webhooks: BTreeMap<i64, Webhook>,
    next_webhook_id: i64,
    deliveries: Vec<DeliveryAttempt>,
    next_delivery_id: i64,
    // fault injection for pipeline tests
    rejected_skus: HashSet<String>,
    unavailable_writes: u32,
    crash_next_write: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Any write touching `sku` fails as a constraint violation would.
    #[cfg(test)]
    pub fn reject_sku(&self, sku: &str) {
        self.lock().rejected_skus.insert(sku.to_string());
    }

    /// The next product write panics.
    #[cfg(test)]
    pub fn crash_next_write(&self) {
        self.lock().crash_next_write = true;
    }

    /// The next `count` product writes fail as if the store were unreachable.
    #[cfg(test)]
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().unavailable_writes = count;
    }
}

impl Inner {
    fn check_write(&mut self, rows: &[ProductRecord]) -> Result<(), StoreError> {
        if std::mem::take(&mut self.crash_next_write) {
            panic!("catalog store crashed while writing");
        }
        if self.unavailable_writes > 0 {
            self.unavailable_writes -= 1;
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        if let Some(row) = rows.iter().find(|r| self.rejected_skus.contains(&r.sku)) {
            return Err(StoreError::Rejected(format!(
                "value violates check constraint for sku '{}'",
                row.sku
            )));
        }
        Ok(())
    }

    fn upsert(&mut self, row: &ProductRecord) -> UpsertCounts {
        if let Some(id) = self.by_sku.get(&row.sku) {
            if let Some(existing) = self.products.get_mut(id) {
                existing.name = row.name.clone();
                existing.description = row.description.clone();
                return UpsertCounts { created: 0, updated: 1 };
            }
        }
        self.insert(NewProduct {
            sku: row.sku.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            is_active: row.is_active.unwrap_or(true),
        });
        UpsertCounts { created: 1, updated: 0 }
    }

    fn insert(&mut self, product: NewProduct) -> Product {
        self.next_product_id += 1;
        let stored = Product {
            id: self.next_product_id,
            sku: product.sku,
            name: product.name,
            description: product.description,
            is_active: product.is_active,
            created_at: Some(Utc::now()),
        };
        self.by_sku.insert(stored.sku.clone(), stored.id);
        self.products.insert(stored.id, stored.clone());
        stored
    }

    fn remove(&mut self, id: i64) -> bool {
        match self.products.remove(&id) {
            Some(product) => {
                self.by_sku.remove(&product.sku);
                true
            }
            None => false,
        }
    }
}

fn matches_search(product: &Product, needle: &str) -> bool {
    product.sku.to_lowercase().contains(needle)
        || product.name.to_lowercase().contains(needle)
        || product
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(needle))
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn upsert_batch(&self, rows: &[ProductRecord]) -> Result<UpsertCounts, StoreError> {
        let mut inner = self.lock();
        inner.check_write(rows)?;
        let mut counts = UpsertCounts::default();
        for row in rows {
            counts.add(inner.upsert(row));
        }
        Ok(counts)
    }

    async fn upsert_one(&self, row: &ProductRecord) -> Result<UpsertCounts, StoreError> {
        let mut inner = self.lock();
        inner.check_write(std::slice::from_ref(row))?;
        Ok(inner.upsert(row))
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<(Vec<Product>, u64), StoreError> {
        let inner = self.lock();
        let needle = query.search.as_deref().map(str::to_lowercase);
        let matching: Vec<&Product> = inner
            .products
            .values()
            .filter(|p| needle.as_deref().map_or(true, |n| matches_search(p, n)))
            .collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>, StoreError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .by_sku
            .get(sku)
            .and_then(|id| inner.products.get(id))
            .cloned())
    }

    async fn create_product(&self, product: &NewProduct) -> Result<Product, StoreError> {
        let mut inner = self.lock();
        if inner.by_sku.contains_key(&product.sku) {
            return Err(StoreError::Conflict(format!(
                "duplicate key value violates unique constraint on sku '{}'",
                product.sku
            )));
        }
        Ok(inner.insert(product.clone()))
    }

    async fn update_product(
        &self,
        id: i64,
        changes: &ProductChanges,
    ) -> Result<Option<Product>, StoreError> {
        let mut inner = self.lock();
        let Some(product) = inner.products.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            product.name = name.clone();
        }
        if let Some(description) = &changes.description {
            product.description = Some(description.clone());
        }
        if let Some(is_active) = changes.is_active {
            product.is_active = is_active;
        }
        Ok(Some(product.clone()))
    }

    async fn delete_product(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.lock().remove(id))
    }

    async fn delete_products(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        Ok(ids.iter().filter(|id| inner.remove(**id)).count() as u64)
    }

    async fn delete_all_products(&self) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let count = inner.products.len() as u64;
        inner.products.clear();
        inner.by_sku.clear();
        Ok(count)
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn list_webhooks(&self) -> Result<Vec<Webhook>, StoreError> {
        Ok(self.lock().webhooks.values().cloned().collect())
    }

    async fn active_webhooks(&self, event_type: &str) -> Result<Vec<Webhook>, StoreError> {
        Ok(self
            .lock()
            .webhooks
            .values()
            .filter(|w| w.is_active && w.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn create_webhook(&self, webhook: &NewWebhook) -> Result<Webhook, StoreError> {
        let mut inner = self.lock();
        inner.next_webhook_id += 1;
        let stored = Webhook {
            id: inner.next_webhook_id,
            url: webhook.url.clone(),
            event_type: webhook.event_type.clone(),
            is_active: webhook.is_active,
            created_at: Utc::now(),
        };
        inner.webhooks.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_webhook(
        &self,
        id: i64,
        changes: &WebhookChanges,
    ) -> Result<Option<Webhook>, StoreError> {
        let mut inner = self.lock();
        let Some(webhook) = inner.webhooks.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(url) = &changes.url {
            webhook.url = url.clone();
        }
        if let Some(event_type) = &changes.event_type {
            webhook.event_type = event_type.clone();
        }
        if let Some(is_active) = changes.is_active {
            webhook.is_active = is_active;
        }
        Ok(Some(webhook.clone()))
    }

    async fn delete_webhook(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let removed = inner.webhooks.remove(&id).is_some();
        if removed {
            inner.deliveries.retain(|d| d.webhook_id != id);
        }
        Ok(removed)
    }

    async fn record_delivery(&self, attempt: &NewDeliveryAttempt) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.next_delivery_id += 1;
        let id = inner.next_delivery_id;
        inner.deliveries.push(DeliveryAttempt {
            id,
            webhook_id: attempt.webhook_id,
            task_id: attempt.task_id,
            attempt: attempt.attempt,
            success: attempt.success,
            status_code: attempt.status_code,
            error: attempt.error.clone(),
            attempted_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_deliveries(&self, webhook_id: i64) -> Result<Vec<DeliveryAttempt>, StoreError> {
        Ok(self
            .lock()
            .deliveries
            .iter()
            .filter(|d| d.webhook_id == webhook_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sku: &str, name: &str) -> ProductRecord {
        ProductRecord {
            sku: sku.to_string(),
            name: name.to_string(),
            description: None,
            is_active: None,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_is_active_of_existing_product() {
        let store = MemoryStore::new();
        let created = store
            .create_product(&NewProduct {
                sku: "A1".into(),
                name: "Widget".into(),
                description: None,
                is_active: false,
            })
            .await
            .unwrap();

        let mut row = record("A1", "Widget v2");
        row.is_active = Some(true);
        let counts = store.upsert_one(&row).await.unwrap();
        assert_eq!(counts, UpsertCounts { created: 0, updated: 1 });

        let stored = store.get_product(created.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Widget v2");
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn rejected_batch_applies_nothing() {
        let store = MemoryStore::new();
        store.reject_sku("BAD");
        let err = store
            .upsert_batch(&[record("A1", "ok"), record("BAD", "nope")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.find_by_sku("A1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let store = MemoryStore::new();
        let product = NewProduct {
            sku: "TEST-001".into(),
            name: "Test Product".into(),
            description: None,
            is_active: true,
        };
        store.create_product(&product).await.unwrap();
        let err = store.create_product(&product).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let store = MemoryStore::new();
        store
            .upsert_batch(&[
                record("LAPTOP-001", "Gaming Laptop"),
                record("MOUSE-001", "Gaming Mouse"),
                record("DESK-001", "Standing Desk"),
            ])
            .await
            .unwrap();

        let (page, total) = store
            .list_products(&ProductQuery { search: Some("laptop".into()), page: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].sku, "LAPTOP-001");

        let (page, total) = store
            .list_products(&ProductQuery { search: None, page: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].sku, "DESK-001");
    }

    #[tokio::test]
    async fn only_active_matching_webhooks_are_listed_for_dispatch() {
        let store = MemoryStore::new();
        let active = store
            .create_webhook(&NewWebhook {
                url: "https://example.com/a".into(),
                event_type: "import.completed".into(),
                is_active: true,
            })
            .await
            .unwrap();
        let paused = store
            .create_webhook(&NewWebhook {
                url: "https://example.com/b".into(),
                event_type: "import.completed".into(),
                is_active: true,
            })
            .await
            .unwrap();
        store
            .update_webhook(paused.id, &WebhookChanges { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();

        let hooks = store.active_webhooks("import.completed").await.unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].id, active.id);
    }
}
