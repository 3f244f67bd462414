//! Data models for batch jobs and their file tasks.

use std::sync::Arc;

use serde::Serialize;

use crate::codec::ProcessingOptions;
use crate::error::{ConvertError, ErrorKind};

pub type JobId = String;

/// Current Unix timestamp with sub-second precision, matching the wire
/// format of the progress endpoints.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// State of a single file task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    SkippedCancel,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::SkippedCancel
        )
    }
}

/// State of a job. Transitions are monotonic:
/// `CREATED -> RUNNING -> {COMPLETED | CANCELLED | FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    /// Wire status string used by the progress endpoints.
    pub fn wire_status(&self) -> &'static str {
        match self {
            JobState::Created => "pending",
            JobState::Running => "processing",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "error",
        }
    }
}

/// Successful task outcome: produced metadata plus the cache reference.
#[derive(Debug, Clone)]
pub struct TaskSuccess {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    pub fingerprint: String,
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success(TaskSuccess),
    Failure { kind: ErrorKind, message: String },
}

/// One unit of work within a job.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub task_id: usize,
    pub file_name: String,
    pub source: Arc<Vec<u8>>,
    pub fingerprint: String,
    pub state: TaskState,
    pub started_at: Option<f64>,
    pub finished_at: Option<f64>,
    pub outcome: Option<TaskOutcome>,
}

impl FileTask {
    pub fn processing_time(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).max(0.0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// A batch job. Owned exclusively by the registry; all mutations happen
/// under the job's lock.
#[derive(Debug)]
pub struct Job {
    pub job_id: JobId,
    pub options: ProcessingOptions,
    pub tasks: Vec<FileTask>,
    pub state: JobState,
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub finished_at: Option<f64>,
    pub counters: JobCounters,
    pub current_file_hint: Option<String>,
    /// Admission warnings surfaced when some files were rejected.
    pub warnings: Vec<String>,
    pub failure_reason: Option<String>,
    /// Guards the exactly-once delivery of the terminal event.
    pub terminal_event_sent: bool,
}

impl Job {
    pub fn recount(&mut self) {
        let mut counters = JobCounters {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.state {
                TaskState::Succeeded => {
                    counters.succeeded += 1;
                    counters.completed += 1;
                }
                TaskState::Failed => {
                    counters.failed += 1;
                    counters.completed += 1;
                }
                TaskState::SkippedCancel => {
                    counters.skipped += 1;
                    counters.completed += 1;
                }
                TaskState::Pending | TaskState::Running => {}
            }
        }
        self.counters = counters;
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.counters.completed == self.counters.total
    }

    /// Refresh the display hint to some currently running task.
    pub fn refresh_current_file_hint(&mut self) {
        self.current_file_hint = self
            .tasks
            .iter()
            .find(|t| t.state == TaskState::Running)
            .map(|t| t.file_name.clone());
    }
}

/// Metadata of one successfully converted file, reported on terminal
/// progress snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessfulFileResult {
    pub file_path: String,
    pub format: String,
    pub size: (u32, u32),
    pub file_size: u64,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFileDetail {
    pub file_path: String,
    pub error: String,
    pub error_code: ErrorKind,
}

/// Read-only projection of a job, shaped for the progress endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub queue_id: JobId,
    pub total_files: usize,
    pub completed_files: usize,
    pub current_file: String,
    pub estimated_time_remaining: f64,
    pub status: String,
    pub error_count: usize,
    pub start_time: f64,
    pub current_file_progress: f64,
    pub progress_percentage: f64,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_results: Option<Vec<SuccessfulFileResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_file_details: Option<Vec<FailedFileDetail>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl ProgressSnapshot {
    /// Build a snapshot from a locked job. `max_concurrent` feeds the
    /// ETA estimate, which accounts for parallel task execution.
    pub fn from_job(job: &Job, max_concurrent: usize) -> Self {
        let counters = job.counters;
        let total = counters.total;
        let completed = counters.completed;

        let progress_percentage = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        let success_rate = if completed == 0 {
            100.0
        } else {
            counters.succeeded as f64 / completed as f64 * 100.0
        };

        let terminal = job.state.is_terminal();
        let current_file_progress = if terminal { 1.0 } else { 0.0 };

        let completed_durations: Vec<f64> = job
            .tasks
            .iter()
            .filter(|t| t.state.is_terminal())
            .filter_map(|t| t.processing_time())
            .collect();
        let avg_task_time = if completed_durations.is_empty() {
            0.0
        } else {
            completed_durations.iter().sum::<f64>() / completed_durations.len() as f64
        };

        let remaining = total.saturating_sub(completed);
        let estimated_time_remaining = if terminal || remaining == 0 || completed == 0 {
            0.0
        } else {
            let concurrency = max_concurrent.min(remaining).max(1);
            (avg_task_time * remaining as f64 / concurrency as f64).max(0.0)
        };

        let mut snapshot = Self {
            queue_id: job.job_id.clone(),
            total_files: total,
            completed_files: completed,
            current_file: job.current_file_hint.clone().unwrap_or_default(),
            estimated_time_remaining,
            status: job.state.wire_status().to_string(),
            error_count: counters.failed,
            start_time: job.started_at.unwrap_or(0.0),
            current_file_progress,
            progress_percentage,
            success_rate,
            successful_files: None,
            failed_files: None,
            skipped_files: None,
            average_processing_time: None,
            total_processing_time: None,
            successful_results: None,
            failed_file_details: None,
            warnings: job.warnings.clone(),
        };

        if terminal {
            snapshot.successful_files = Some(counters.succeeded);
            snapshot.failed_files = Some(counters.failed);
            snapshot.skipped_files = Some(counters.skipped);
            snapshot.average_processing_time = Some(avg_task_time);
            snapshot.total_processing_time = Some(match (job.started_at, job.finished_at) {
                (Some(start), Some(end)) => (end - start).max(0.0),
                _ => 0.0,
            });

            let successful_results: Vec<SuccessfulFileResult> = job
                .tasks
                .iter()
                .filter_map(|task| match &task.outcome {
                    Some(TaskOutcome::Success(success)) => Some(SuccessfulFileResult {
                        file_path: task.file_name.clone(),
                        format: success.format.clone(),
                        size: (success.width, success.height),
                        file_size: success.byte_size,
                        processing_time: task.processing_time().unwrap_or(0.0),
                    }),
                    _ => None,
                })
                .collect();
            snapshot.successful_results = Some(successful_results);

            let failed_details: Vec<FailedFileDetail> = job
                .tasks
                .iter()
                .filter_map(|task| match &task.outcome {
                    Some(TaskOutcome::Failure { kind, message }) => Some(FailedFileDetail {
                        file_path: task.file_name.clone(),
                        error: message.clone(),
                        error_code: *kind,
                    }),
                    _ => None,
                })
                .collect();
            snapshot.failed_file_details = Some(failed_details);
        }

        snapshot
    }
}

/// Summary row of a job for the batch-status listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub queue_id: JobId,
    pub status: String,
    pub total_files: usize,
    pub pending_files: usize,
    pub processing_files: usize,
    pub completed_files: usize,
    pub error_files: usize,
    pub created_time: f64,
    pub started_time: Option<f64>,
    pub completed_time: Option<f64>,
    pub cancelled: bool,
    pub max_concurrent: usize,
}

/// Aggregate statistics across all tracked jobs.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatistics {
    pub total_queues: usize,
    pub active_queues: usize,
    pub completed_queues: usize,
    pub cancelled_queues: usize,
    pub error_queues: usize,
    pub total_files: usize,
    pub completed_files: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

/// Per-file admission rejection reported by start_batch.
#[derive(Debug, Clone)]
pub struct FileRejection {
    pub file_name: String,
    pub error: ConvertError,
}
