//! Asynchronous bulk import of product CSV files.
//!
//! An upload is spooled to disk and queued; a worker streams it through the
//! [`reader::ChunkedReader`], normalizes every record, applies each chunk with
//! the [`upsert::UpsertExecutor`] and publishes progress through the task's
//! [`task::TaskWriter`]. Once the task is terminal the notification
//! dispatcher is handed the final snapshot.

pub mod error;
pub mod normalizer;
pub mod reader;
pub mod task;
pub mod upsert;
pub mod worker;

pub use error::{ReadError, RowError, TaskError};
pub use task::{TaskRegistry, TaskWriter};
pub use worker::{ImportService, ImportSettings};
