// src/import/worker.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::error::TaskError;
use super::reader::{count_records, ChunkedReader};
use super::task::{TaskRegistry, TaskWriter};
use super::upsert::{RetryPolicy, UpsertExecutor};
use crate::models::import_task::{ImportTask, TaskStatus};
use crate::notify::Dispatcher;
use crate::store::CatalogStore;

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub chunk_size: usize,
    pub workers: usize,
    /// Count records before importing so `progress.total` is known early.
    pub precount: bool,
    pub retry: RetryPolicy,
    /// Also notify subscribers when an import fails.
    pub notify_on_failure: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            chunk_size: 3000,
            workers: 2,
            precount: true,
            retry: RetryPolicy::default(),
            notify_on_failure: false,
        }
    }
}

/// A queued upload. Carries the task's only writer to whichever worker
/// dequeues it.
struct ImportJob {
    writer: TaskWriter,
    path: PathBuf,
}

/// Entry point for imports: accepts uploads, runs them on a fixed pool of
/// workers and answers status queries.
#[derive(Clone)]
pub struct ImportService {
    registry: TaskRegistry,
    queue: mpsc::UnboundedSender<ImportJob>,
}

impl ImportService {
    /// Spawns `settings.workers` workers on the current runtime.
    pub fn start(
        settings: ImportSettings,
        catalog: Arc<dyn CatalogStore>,
        dispatcher: Dispatcher,
    ) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let jobs = Arc::new(Mutex::new(jobs));
        let importer = Arc::new(Importer {
            executor: UpsertExecutor::new(catalog, settings.retry),
            dispatcher,
            settings: settings.clone(),
        });

        for slot in 0..settings.workers.max(1) {
            tokio::spawn(run_worker(slot, jobs.clone(), importer.clone()));
        }
        info!(workers = settings.workers.max(1), chunk_size = settings.chunk_size, "Import workers started");

        Self {
            registry: TaskRegistry::new(),
            queue,
        }
    }

    /// Creates a `pending` task for the spooled file at `path` and queues it.
    /// Returns as soon as the job is queued.
    pub fn submit(&self, file_name: &str, path: PathBuf) -> Result<Uuid, TaskError> {
        let writer = self.registry.create(file_name);
        let id = writer.id();
        if self.queue.send(ImportJob { writer, path }).is_err() {
            self.registry.remove(id);
            return Err(TaskError::QueueClosed);
        }
        info!(task_id = %id, file_name, "Import queued");
        Ok(id)
    }

    pub fn status(&self, id: Uuid) -> Option<ImportTask> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }
}

async fn run_worker(
    slot: usize,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<ImportJob>>>,
    importer: Arc<Importer>,
) {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            debug!(slot, "Import queue closed, worker exiting");
            break;
        };

        // Each job runs on its own task so a panic ends that import only.
        // The dropped writer marks the task failed.
        let task_id = job.writer.id();
        let path = job.path.clone();
        let importer = importer.clone();
        if let Err(err) = tokio::spawn(async move { importer.run(job).await }).await {
            error!(slot, %task_id, error = %err, "Import job crashed");
            if let Err(err) = tokio::fs::remove_file(&path).await {
                debug!(file = %path.display(), error = %err, "Spooled upload already gone");
            }
        }
    }
}

struct Importer {
    executor: UpsertExecutor,
    dispatcher: Dispatcher,
    settings: ImportSettings,
}

impl Importer {
    #[instrument(skip_all, fields(task_id = %job.writer.id()))]
    async fn run(&self, job: ImportJob) {
        let ImportJob { mut writer, path } = job;

        if let Err(err) = writer.start() {
            error!(error = %err, "Import task could not be started");
            return;
        }
        info!(file = %path.display(), "Import started");

        let finished = match self.ingest(&mut writer, &path).await {
            Ok(()) => writer.complete(),
            Err(err) => {
                error!(error = %err, "Import failed");
                writer.fail(&err)
            }
        };

        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(file = %path.display(), error = %err, "Could not remove spooled upload");
        }

        let task = match finished {
            Ok(task) => task,
            Err(err) => {
                error!(error = %err, "Import task could not be finalized");
                return;
            }
        };
        info!(
            status = %task.status,
            created = task.summary.created,
            updated = task.summary.updated,
            skipped = task.summary.skipped,
            "Import finished"
        );

        if task.status == TaskStatus::Completed || self.settings.notify_on_failure {
            self.dispatcher.dispatch(task);
        }
    }

    async fn ingest(&self, writer: &mut TaskWriter, path: &Path) -> Result<(), TaskError> {
        if self.settings.precount {
            let count_path = path.to_path_buf();
            match spawn_blocking(move || count_records(&count_path)).await? {
                Ok(total) => writer.set_total(total),
                Err(err) => warn!(error = %err, "Could not count rows up front"),
            }
        }

        let open_path = path.to_path_buf();
        let chunk_size = self.settings.chunk_size;
        let mut reader = spawn_blocking(move || ChunkedReader::open(&open_path, chunk_size)).await??;
        let mut valid_rows = 0u64;

        loop {
            let (returned, next) = spawn_blocking(move || {
                let next = reader.next_chunk();
                (reader, next)
            })
            .await?;
            reader = returned;
            let Some(chunk) = next? else { break };

            let consumed = chunk.consumed();
            valid_rows += chunk.records.len() as u64;

            let mut report = self.executor.apply(&chunk.records, &chunk.lines).await?;
            report.summary.skipped += chunk.rejected.len() as u64;
            report.failures.extend(chunk.rejected);
            report.failures.sort_by_key(|f| f.row);

            debug!(
                chunk = chunk.index,
                consumed,
                created = report.summary.created,
                updated = report.summary.updated,
                skipped = report.summary.skipped,
                "Chunk applied"
            );
            writer.record_chunk(consumed, report);
        }
        writer.finish_reading();

        if valid_rows == 0 {
            return Err(TaskError::NoValidRows);
        }
        if writer.snapshot().summary.written() == 0 {
            return Err(TaskError::NothingImported);
        }
        Ok(())
    }
}
