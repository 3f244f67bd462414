//! Progress event types published by the batch pipeline.

use serde::Serialize;

use crate::batch::{JobId, ProgressSnapshot, TaskState};
use crate::error::ErrorKind;

/// Payload of a `file_processed` event: one per task terminal
/// transition.
#[derive(Debug, Clone, Serialize)]
pub struct FileProcessedPayload {
    pub queue_id: JobId,
    pub file_path: String,
    pub task_id: usize,
    pub state: TaskState,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorKind>,
}

/// Events delivered to subscribers of a job's room.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    BatchStarted {
        queue_id: JobId,
        total_files: usize,
    },
    BatchProgress(ProgressSnapshot),
    FileProcessed(FileProcessedPayload),
    BatchCompleted(ProgressSnapshot),
    BatchCancelled(ProgressSnapshot),
    BatchError {
        queue_id: JobId,
        error: String,
        error_code: ErrorKind,
    },
}

impl ProgressEvent {
    /// The WebSocket event name for this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            ProgressEvent::BatchStarted { .. } => "batch_started",
            ProgressEvent::BatchProgress(_) => "batch_progress",
            ProgressEvent::FileProcessed(_) => "file_processed",
            ProgressEvent::BatchCompleted(_) => "batch_completed",
            ProgressEvent::BatchCancelled(_) => "batch_cancelled",
            ProgressEvent::BatchError { .. } => "batch_error",
        }
    }

    /// Terminal events close a job's stream and are never dropped by
    /// the buffer policy.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::BatchCompleted(_)
                | ProgressEvent::BatchCancelled(_)
                | ProgressEvent::BatchError { .. }
        )
    }

    pub fn queue_id(&self) -> &str {
        match self {
            ProgressEvent::BatchStarted { queue_id, .. } => queue_id,
            ProgressEvent::BatchProgress(snap) => &snap.queue_id,
            ProgressEvent::FileProcessed(payload) => &payload.queue_id,
            ProgressEvent::BatchCompleted(snap) => &snap.queue_id,
            ProgressEvent::BatchCancelled(snap) => &snap.queue_id,
            ProgressEvent::BatchError { queue_id, .. } => queue_id,
        }
    }
}
