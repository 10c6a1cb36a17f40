// src/dtos/import.rs
use serde::Serialize;
use uuid::Uuid;

use crate::models::import_task::{ImportSummary, ImportTask, Progress, RowFailure, TaskStatus};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub file_name: String,
    pub status: TaskStatus,
    pub message: String,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: ImportSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RowFailure>,
    pub updated_at: String,
}

impl From<ImportTask> for TaskStatusResponse {
    fn from(task: ImportTask) -> Self {
        Self {
            task_id: task.id,
            file_name: task.file_name,
            status: task.status,
            message: task.message,
            progress: task.progress,
            error: task.error,
            result: task.summary,
            errors: task.row_errors,
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}
