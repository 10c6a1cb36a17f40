use thiserror::Error;

use crate::store::StoreError;

/// A single row that cannot be imported. Counted as skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{0}")]
    Store(StoreError),
}

/// The uploaded file cannot be read any further.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("could not read upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV header is missing required column `{0}`")]
    MissingColumn(&'static str),
}

/// Ends the owning task in `failed`. Never escapes the worker.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("catalog store unavailable after retries: {0}")]
    StoreUnavailable(String),
    #[error("CSV contained no valid rows. Ensure the file has sku and name values.")]
    NoValidRows,
    #[error("No products were imported. Verify rows include sku and name values.")]
    NothingImported,
    #[error("import worker crashed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("import queue is closed")]
    QueueClosed,
    #[error("import stopped before it could finish")]
    Abandoned,
    #[error("invalid task transition from {from} to {to}")]
    Transition {
        from: crate::models::import_task::TaskStatus,
        to: crate::models::import_task::TaskStatus,
    },
}
