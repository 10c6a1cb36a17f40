// src/import/upsert.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::{RowError, TaskError};
use crate::models::import_task::{ImportSummary, RowFailure};
use crate::models::product::ProductRecord;
use crate::store::{CatalogStore, StoreError, UpsertCounts};

/// Bounded retry for transient store failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub summary: ImportSummary,
    pub failures: Vec<RowFailure>,
}

impl From<UpsertCounts> for BatchReport {
    fn from(counts: UpsertCounts) -> Self {
        Self {
            summary: ImportSummary {
                created: counts.created,
                updated: counts.updated,
                skipped: 0,
            },
            failures: Vec::new(),
        }
    }
}

/// Applies validated chunks to the catalog.
///
/// A chunk is first written as one atomic batch. If the store refuses the
/// batch the rows are replayed one at a time so a single bad row costs only
/// itself; rows that still fail are reported back as skipped. A store that
/// stays unreachable past the retry budget aborts the task.
#[derive(Clone)]
pub struct UpsertExecutor {
    store: Arc<dyn CatalogStore>,
    retry: RetryPolicy,
}

impl UpsertExecutor {
    pub fn new(store: Arc<dyn CatalogStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn apply(
        &self,
        records: &[ProductRecord],
        lines: &[u64],
    ) -> Result<BatchReport, TaskError> {
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        match self.with_retry(|| self.store.upsert_batch(records)).await {
            Ok(counts) => Ok(counts.into()),
            Err(err) => {
                warn!(rows = records.len(), error = %err, "Batch upsert failed, applying rows individually");
                self.apply_each(records, lines).await
            }
        }
    }

    async fn apply_each(
        &self,
        records: &[ProductRecord],
        lines: &[u64],
    ) -> Result<BatchReport, TaskError> {
        let mut report = BatchReport::default();
        for (idx, record) in records.iter().enumerate() {
            match self.with_retry(|| self.store.upsert_one(record)).await {
                Ok(counts) => {
                    report.summary.created += counts.created;
                    report.summary.updated += counts.updated;
                }
                Err(StoreError::Unavailable(msg)) => return Err(TaskError::StoreUnavailable(msg)),
                Err(err) => {
                    let row = lines.get(idx).copied().unwrap_or_default();
                    warn!(row, sku = %record.sku, error = %err, "Skipping row rejected by store");
                    report.summary.skipped += 1;
                    report.failures.push(RowFailure {
                        row,
                        error: RowError::Store(err).to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn with_retry<F, Fut, T>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    debug!(attempt, ?delay, error = %err, "Store unavailable, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
