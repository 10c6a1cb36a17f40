// src/import/task.rs
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Duration, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use super::error::TaskError;
use super::upsert::BatchReport;
use crate::models::import_task::{ImportTask, TaskStatus};

/// Row failures kept on the snapshot; counts stay exact past this.
pub const MAX_ROW_ERRORS: usize = 100;

/// Read side of every known import task.
///
/// Each task lives in its own `watch` channel. The worker holds the only
/// [`TaskWriter`]; pollers clone the last published snapshot and never wait
/// on a chunk in flight.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<Uuid, watch::Receiver<ImportTask>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new `pending` task and hands back its single writer.
    pub fn create(&self, file_name: &str) -> TaskWriter {
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(ImportTask::new(id, file_name));
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, rx);
        TaskWriter { tx }
    }

    /// Last committed snapshot, or `None` for an unknown id.
    pub fn get(&self, id: Uuid) -> Option<ImportTask> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|rx| rx.borrow().clone())
    }

    /// Drops a task that never reached a worker.
    pub fn remove(&self, id: Uuid) -> bool {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Forgets terminal tasks that finished more than `max_age` ago. Tasks
    /// still pending or processing are kept.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return 0;
        };
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let before = tasks.len();
        tasks.retain(|_, rx| match rx.borrow().finished_at {
            Some(finished_at) => finished_at > cutoff,
            None => true,
        });
        before - tasks.len()
    }
}

/// Exclusive write handle to one task.
///
/// Not `Clone`: exactly one worker mutates a task. The terminal transitions
/// consume the writer, so nothing can change a task once it is completed or
/// failed.
pub struct TaskWriter {
    tx: watch::Sender<ImportTask>,
}

impl TaskWriter {
    pub fn id(&self) -> Uuid {
        self.tx.borrow().id
    }

    pub fn snapshot(&self) -> ImportTask {
        self.tx.borrow().clone()
    }

    fn transition(&self, next: TaskStatus) -> Result<(), TaskError> {
        let from = self.tx.borrow().status;
        if from.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::Transition { from, to: next })
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ImportTask)) {
        self.tx.send_modify(|task| {
            update(task);
            task.version += 1;
            task.updated_at = Utc::now();
        });
    }

    /// pending -> processing. Called by the worker that claimed the task.
    pub fn start(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Processing)?;
        self.publish(|task| {
            task.status = TaskStatus::Processing;
            task.message = "Reading CSV file...".to_string();
        });
        Ok(())
    }

    /// Publishes the record count once it is known. Never below `current`.
    pub fn set_total(&mut self, total: u64) {
        self.publish(|task| {
            task.progress.total = Some(total.max(task.progress.current));
        });
    }

    /// Folds one applied chunk into the running counters. `current` only
    /// grows, and `total` is raised if the precount fell short.
    pub fn record_chunk(&mut self, consumed: u64, report: BatchReport) {
        self.publish(|task| {
            task.progress.current += consumed;
            if let Some(total) = task.progress.total.as_mut() {
                *total = (*total).max(task.progress.current);
            }
            task.summary.absorb(report.summary);
            let room = MAX_ROW_ERRORS.saturating_sub(task.row_errors.len());
            task.row_errors.extend(report.failures.into_iter().take(room));
            task.message = format!("Processed {} products...", task.progress.current);
        });
    }

    /// The reader is exhausted: whatever was consumed is the total.
    pub fn finish_reading(&mut self) {
        self.publish(|task| {
            task.progress.total = Some(task.progress.current);
        });
    }

    /// processing -> completed. Returns the final snapshot.
    pub fn complete(self) -> Result<ImportTask, TaskError> {
        self.transition(TaskStatus::Completed)?;
        self.publish(|task| {
            task.status = TaskStatus::Completed;
            task.finished_at = Some(Utc::now());
            task.message = format!(
                "Successfully processed {} products",
                task.summary.written()
            );
        });
        Ok(self.snapshot())
    }

    /// processing -> failed. Returns the final snapshot.
    pub fn fail(self, error: &TaskError) -> Result<ImportTask, TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.mark_failed(error);
        Ok(self.snapshot())
    }

    fn mark_failed(&self, error: &TaskError) {
        let reason = error.to_string();
        self.publish(|task| {
            task.status = TaskStatus::Failed;
            task.finished_at = Some(Utc::now());
            task.message = "Import failed".to_string();
            task.error = Some(reason);
        });
    }
}

// A writer dropped before a terminal transition (panic, shutdown) must not
// leave its task looking alive to pollers.
impl Drop for TaskWriter {
    fn drop(&mut self) {
        if !self.tx.borrow().status.is_terminal() {
            self.mark_failed(&TaskError::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::import_task::{ImportSummary, RowFailure};

    fn report(created: u64, skipped: u64) -> BatchReport {
        BatchReport {
            summary: ImportSummary { created, updated: 0, skipped },
            failures: (0..skipped)
                .map(|i| RowFailure { row: i + 2, error: "missing required field `sku`".into() })
                .collect(),
        }
    }

    #[test]
    fn created_task_is_pending_and_readable() {
        let registry = TaskRegistry::new();
        let writer = registry.create("products.csv");
        let task = registry.get(writer.id()).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.file_name, "products.csv");
        assert_eq!(task.progress.current, 0);
        assert!(registry.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn chunks_advance_progress_and_summary() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("p.csv");
        let id = writer.id();
        writer.start().unwrap();
        writer.set_total(5);

        writer.record_chunk(3, report(3, 0));
        let mid = registry.get(id).unwrap();
        assert_eq!(mid.status, TaskStatus::Processing);
        assert_eq!(mid.progress.current, 3);
        assert_eq!(mid.progress.total, Some(5));

        writer.record_chunk(2, report(1, 1));
        writer.finish_reading();
        let done = writer.complete().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress.current, 5);
        assert_eq!(done.progress.total, Some(5));
        assert_eq!(done.summary, ImportSummary { created: 4, updated: 0, skipped: 1 });
        assert_eq!(done.row_errors.len(), 1);
        assert!(done.finished_at.is_some());
        assert!(done.version > mid.version);
    }

    #[test]
    fn current_never_exceeds_a_short_precount() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("p.csv");
        writer.start().unwrap();
        writer.set_total(2);
        writer.record_chunk(4, report(4, 0));
        let task = writer.snapshot();
        assert_eq!(task.progress.current, 4);
        assert_eq!(task.progress.total, Some(4));
    }

    #[test]
    fn unknown_total_is_filled_when_reading_ends() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("p.csv");
        writer.start().unwrap();
        writer.record_chunk(7, report(7, 0));
        assert_eq!(writer.snapshot().progress.total, None);
        writer.finish_reading();
        assert_eq!(writer.snapshot().progress.total, Some(7));
    }

    #[test]
    fn cannot_start_twice_or_finish_before_starting() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("p.csv");
        writer.start().unwrap();
        assert!(matches!(
            writer.start(),
            Err(TaskError::Transition { from: TaskStatus::Processing, .. })
        ));

        let pending = registry.create("q.csv");
        assert!(pending.complete().is_err());
    }

    #[test]
    fn failure_records_the_error() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("p.csv");
        let id = writer.id();
        writer.start().unwrap();
        let task = writer.fail(&TaskError::NoValidRows).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("no valid rows"));
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn row_error_list_is_capped() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("p.csv");
        writer.start().unwrap();
        writer.record_chunk(150, report(0, 150));
        let task = writer.snapshot();
        assert_eq!(task.summary.skipped, 150);
        assert_eq!(task.row_errors.len(), MAX_ROW_ERRORS);
    }

    #[test]
    fn prune_drops_only_old_terminal_tasks() {
        let registry = TaskRegistry::new();
        let mut finished = registry.create("done.csv");
        finished.start().unwrap();
        finished.complete().unwrap();
        let running = registry.create("running.csv");

        assert_eq!(registry.prune_finished(Duration::hours(1)), 0);
        assert_eq!(registry.prune_finished(Duration::seconds(-1)), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(running.id()).is_some());
    }

    #[test]
    fn prune_with_huge_retention_keeps_everything() {
        let registry = TaskRegistry::new();
        let mut finished = registry.create("done.csv");
        finished.start().unwrap();
        finished.complete().unwrap();

        assert_eq!(registry.prune_finished(Duration::try_days(200_000_000).unwrap()), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_writer_fails_its_task() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("crash.csv");
        let id = writer.id();
        writer.start().unwrap();
        writer.record_chunk(10, report(10, 0));
        drop(writer);

        let task = registry.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.finished_at.is_some());
        assert_eq!(task.error.as_deref(), Some(TaskError::Abandoned.to_string().as_str()));
        assert_eq!(task.summary.created, 10);
    }

    #[test]
    fn finished_writer_is_left_alone_on_drop() {
        let registry = TaskRegistry::new();
        let mut writer = registry.create("ok.csv");
        let id = writer.id();
        writer.start().unwrap();
        writer.complete().unwrap();
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Completed);
    }
}
