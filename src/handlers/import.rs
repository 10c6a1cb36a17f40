// src/handlers/import.rs
use std::path::Path as FsPath;

use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    Json,
};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::dtos::import::{TaskStatusResponse, UploadResponse};
use crate::error::AppError;
use crate::import::TaskError;
use crate::state::AppState;

fn is_csv(file_name: &str) -> bool {
    FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Streams one multipart field to `dest`. Returns the byte count, or `None`
/// once the field exceeds `limit`.
async fn spool(field: &mut Field<'_>, dest: &FsPath, limit: u64) -> Result<Option<u64>, AppError> {
    let mut file = File::create(dest)
        .await
        .map_err(|e| AppError::internal(format!("failed to create upload file: {e}")))?;
    let mut written: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::validation(format!("Failed to read upload: {e}")))?
    {
        written += chunk.len() as u64;
        if written > limit {
            return Ok(None);
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::internal(format!("failed to write upload file: {e}")))?;
    }

    file.flush()
        .await
        .map_err(|e| AppError::internal(format!("failed to flush upload file: {e}")))?;
    Ok(Some(written))
}

// POST /upload - Accept a CSV file and queue it for import
#[instrument(skip(state, multipart))]
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if !is_csv(&file_name) {
            return Err(AppError::validation("Only CSV files are allowed"));
        }

        let path = state.config.upload_dir.join(format!("{}.csv", Uuid::new_v4()));
        let spooled = spool(&mut field, &path, state.config.max_upload_bytes).await;
        let size = match spooled {
            Ok(Some(size)) => size,
            Ok(None) => {
                let _ = tokio::fs::remove_file(&path).await;
                warn!(%file_name, limit = state.config.max_upload_bytes, "Upload rejected: too large");
                return Err(AppError::PayloadTooLarge("File too large".to_string()));
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };

        let task_id = match state.imports.submit(&file_name, path.clone()) {
            Ok(id) => id,
            Err(TaskError::QueueClosed) => {
                let _ = tokio::fs::remove_file(&path).await;
                error!("Import queue closed, rejecting upload");
                return Err(AppError::internal("import workers are not running"));
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(AppError::internal(e.to_string()));
            }
        };

        info!(%task_id, %file_name, size, "Upload accepted");
        return Ok(Json(UploadResponse {
            task_id,
            status: "processing",
        }));
    }

    Err(AppError::validation("Missing 'file' field"))
}

// GET /tasks/{id} - Current snapshot of an import task
#[instrument(skip(state), fields(id))]
pub async fn get_task(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<TaskStatusResponse>, AppError> {
    let task = state
        .imports
        .status(id)
        .ok_or_else(|| AppError::not_found("Task not found"))?;

    Ok(Json(TaskStatusResponse::from(task)))
}
