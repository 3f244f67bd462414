//! Batch lifecycle endpoints.

use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::convert_routes::parse_options;
use super::error::{status_for, ApiResult};
use super::state::GuardedScheduler;
use crate::batch::{now_ts, BatchFileInput, StartBatchError};
use crate::error::ConvertError;

pub(super) async fn read_batch_upload(
    mut multipart: Multipart,
) -> ApiResult<(Vec<BatchFileInput>, Option<String>)> {
    let mut files = Vec::new();
    let mut options_json = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ConvertError::input_invalid(format!("Malformed multipart body: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("files") | Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ConvertError::input_invalid(format!("Failed to read file: {}", e))
                })?;
                if !bytes.is_empty() {
                    files.push(BatchFileInput {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            Some("options") => {
                let text = field.text().await.map_err(|e| {
                    ConvertError::input_invalid(format!("Failed to read options: {}", e))
                })?;
                options_json = Some(text);
            }
            _ => {}
        }
    }

    Ok((files, options_json))
}

/// POST /api/convert/batch-start
pub async fn batch_start(
    State(scheduler): State<GuardedScheduler>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let (files, options_json) = read_batch_upload(multipart).await?;
    if files.is_empty() {
        return Err(ConvertError::input_invalid("No files provided").into());
    }
    let (options, warnings) = parse_options(options_json.as_deref())?;

    match scheduler.start_batch(files, options, warnings) {
        Ok(started) => {
            let mut body = json!({
                "queue_id": started.queue_id,
                "total_files": started.total_files,
                "status": "started",
                "message": format!("Batch processing started for {} files", started.total_files),
            });
            if !started.warnings.is_empty() {
                body["warnings"] = json!(started.warnings);
            }
            Ok(Json(body).into_response())
        }
        Err(StartBatchError::Invalid(error)) => Err(error.into()),
        Err(StartBatchError::AllRejected(rejections)) => {
            let details: Vec<serde_json::Value> = rejections
                .iter()
                .map(|r| {
                    json!({
                        "file_name": r.file_name,
                        "error_code": r.error.kind,
                        "message": r.error.message,
                    })
                })
                .collect();
            Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "All files were rejected",
                    "error_code": rejections[0].error.kind,
                    "message": "All files were rejected",
                    "rejections": details,
                })),
            )
                .into_response())
        }
        Err(StartBatchError::Capacity { job_id, error }) => Ok((
            status_for(error.kind),
            Json(json!({
                "queue_id": job_id,
                "error": error.message,
                "error_code": error.kind,
                "message": error.message,
            })),
        )
            .into_response()),
    }
}

/// GET /api/convert/batch-progress/{queue_id}
pub async fn batch_progress(
    State(scheduler): State<GuardedScheduler>,
    Path(queue_id): Path<String>,
) -> ApiResult<Response> {
    let snapshot = scheduler.progress(&queue_id)?;
    Ok(Json(snapshot).into_response())
}

/// DELETE /api/convert/batch-cancel/{queue_id}
pub async fn batch_cancel(
    State(scheduler): State<GuardedScheduler>,
    Path(queue_id): Path<String>,
) -> ApiResult<Response> {
    let prior_status = scheduler.cancel(&queue_id)?;
    let message = if prior_status == "processing" || prior_status == "pending" {
        "Batch processing cancelled".to_string()
    } else {
        // Cancel of a terminal job is an idempotent no-op.
        format!("Batch already {}", prior_status)
    };
    Ok(Json(json!({
        "queue_id": queue_id,
        "status": "cancelled",
        "message": message,
    }))
    .into_response())
}

/// GET /api/convert/batch-status
pub async fn batch_status(State(scheduler): State<GuardedScheduler>) -> ApiResult<Response> {
    let active_tasks = scheduler.list_active();
    let all_queues = scheduler.registry().list_all_summaries();
    let statistics = scheduler.statistics();
    Ok(Json(json!({
        "active_tasks": active_tasks,
        "all_queues": all_queues,
        "statistics": statistics,
        "timestamp": now_ts(),
    }))
    .into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct CleanupBody {
    pub max_age_hours: Option<f64>,
}

/// POST /api/convert/batch-cleanup
pub async fn batch_cleanup(
    State(scheduler): State<GuardedScheduler>,
    body: Option<Json<CleanupBody>>,
) -> ApiResult<Response> {
    let max_age_hours = body
        .and_then(|Json(b)| b.max_age_hours)
        .unwrap_or(24.0)
        .max(0.0);
    let max_age = Duration::from_secs_f64(max_age_hours * 3600.0);
    let stats = scheduler.cleanup(max_age);

    // Jobs and their driving tasks are reaped together.
    let cleaned_tasks = stats.cleaned_queues;
    Ok(Json(json!({
        "cleaned_tasks": cleaned_tasks,
        "cleaned_queues": stats.cleaned_queues,
        "cleaned_tracking": stats.cleaned_tracking,
        "message": format!(
            "Cleaned up {} tasks, {} queues, {} tracking entries",
            cleaned_tasks, stats.cleaned_queues, stats.cleaned_tracking
        ),
    }))
    .into_response())
}
