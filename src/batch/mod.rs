//! Batch processing core: job models, the registry that owns them, the
//! bounded worker pool, and the scheduler that drives the lifecycle.

mod models;
mod registry;
mod scheduler;
mod worker;

pub use models::{
    now_ts, BatchStatistics, FailedFileDetail, FileRejection, FileTask, Job, JobCounters, JobId,
    JobState, JobSummary, ProgressSnapshot, SuccessfulFileResult, TaskOutcome, TaskState,
    TaskSuccess,
};
pub use registry::{AdmittedFile, CancelOutcome, JobRegistry, TaskEvents, TaskStart};
pub use scheduler::{
    BatchFileInput, BatchScheduler, BatchStarted, CleanupStats, StartBatchError,
};
pub use worker::{TaskRef, WorkerContext, WorkerPool};
