//! Authoritative in-memory store for jobs and their tasks.
//!
//! Each job owns its lock; registry-wide operations take a short-held
//! registry lock plus per-job locks as needed. No lock is ever held
//! across a codec call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use crate::codec::ProcessingOptions;
use crate::error::{ConvertError, ErrorKind, Result};
use crate::events::{FileProcessedPayload, ProgressEvent};

/// A file admitted by the validator, ready to become a task.
#[derive(Debug, Clone)]
pub struct AdmittedFile {
    pub file_name: String,
    pub bytes: Arc<Vec<u8>>,
    pub fingerprint: String,
}

/// What a worker should do with a claimed task.
pub enum TaskStart {
    /// Execute: inputs snapshotted out of the job under its lock.
    Run {
        file_name: String,
        bytes: Arc<Vec<u8>>,
        fingerprint: String,
        options: ProcessingOptions,
    },
    /// The job was already cancelled; the task was recorded as skipped.
    Skipped(TaskEvents),
}

/// Events a registry mutation produced, for the caller to publish.
/// The registry itself never talks to the bus.
pub struct TaskEvents {
    pub file_processed: Option<FileProcessedPayload>,
    pub progress: ProgressSnapshot,
    pub terminal: Option<ProgressEvent>,
}

/// Result of a cancel call.
#[derive(Debug)]
pub struct CancelOutcome {
    pub prior_status: &'static str,
    pub changed: bool,
    pub events: Option<CancelEvents>,
}

#[derive(Debug)]
pub struct CancelEvents {
    pub progress: ProgressSnapshot,
    pub terminal: Option<ProgressSnapshot>,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
    max_concurrent: usize,
    max_queue_size: usize,
}

impl JobRegistry {
    pub fn new(max_concurrent: usize, max_queue_size: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_concurrent,
            max_queue_size,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn job(&self, job_id: &str) -> Result<Arc<Mutex<Job>>> {
        self.jobs
            .read()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| ConvertError::job_not_found(job_id))
    }

    /// Create a job in CREATED state from admitted files.
    pub fn create_job(
        &self,
        options: ProcessingOptions,
        files: Vec<AdmittedFile>,
        warnings: Vec<String>,
    ) -> JobId {
        let job_id = Uuid::new_v4().to_string();
        let tasks: Vec<FileTask> = files
            .into_iter()
            .enumerate()
            .map(|(task_id, file)| FileTask {
                task_id,
                file_name: file.file_name,
                source: file.bytes,
                fingerprint: file.fingerprint,
                state: TaskState::Pending,
                started_at: None,
                finished_at: None,
                outcome: None,
            })
            .collect();

        let mut job = Job {
            job_id: job_id.clone(),
            options,
            tasks,
            state: JobState::Created,
            created_at: now_ts(),
            started_at: None,
            finished_at: None,
            counters: JobCounters::default(),
            current_file_hint: None,
            warnings,
            failure_reason: None,
            terminal_event_sent: false,
        };
        job.recount();

        self.jobs
            .write()
            .unwrap()
            .insert(job_id.clone(), Arc::new(Mutex::new(job)));
        debug!("Created job {}", job_id);
        job_id
    }

    /// CREATED -> RUNNING.
    pub fn start_running(&self, job_id: &str) -> Result<()> {
        let job = self.job(job_id)?;
        let mut job = job.lock().unwrap();
        if job.state == JobState::Created {
            job.state = JobState::Running;
            job.started_at = Some(now_ts());
        }
        Ok(())
    }

    /// Claim a task for execution. If the job was cancelled in the
    /// meantime, the task is drained as SKIPPED_CANCEL without touching
    /// the codec.
    pub fn try_begin_task(&self, job_id: &str, task_id: usize) -> Result<TaskStart> {
        let job = self.job(job_id)?;
        let mut job = job.lock().unwrap();

        if job.state != JobState::Running {
            let payload = Self::skip_task(&mut job, task_id);
            let events = Self::collect_events(&mut job, payload, self.max_concurrent);
            return Ok(TaskStart::Skipped(events));
        }

        let options = job.options.clone();
        let task = job
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ConvertError::internal(format!("Unknown task {} in job", task_id)))?;
        if task.state != TaskState::Pending {
            // Already drained by cancel; nothing to run.
            let progress = ProgressSnapshot::from_job(&job, self.max_concurrent);
            return Ok(TaskStart::Skipped(TaskEvents {
                file_processed: None,
                progress,
                terminal: None,
            }));
        }

        task.state = TaskState::Running;
        task.started_at = Some(now_ts());
        let run = TaskStart::Run {
            file_name: task.file_name.clone(),
            bytes: task.source.clone(),
            fingerprint: task.fingerprint.clone(),
            options,
        };
        job.refresh_current_file_hint();
        Ok(run)
    }

    /// Commit a task outcome. For a cancelled job the outcome is
    /// discarded and the task recorded as SKIPPED_CANCEL (the artifact
    /// stays cached for future requests).
    pub fn finish_task(
        &self,
        job_id: &str,
        task_id: usize,
        outcome: std::result::Result<TaskSuccess, ConvertError>,
    ) -> Result<TaskEvents> {
        let job = self.job(job_id)?;
        let mut job = job.lock().unwrap();

        let cancelled = job.state == JobState::Cancelled;
        let task = job
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ConvertError::internal(format!("Unknown task {} in job", task_id)))?;

        if task.state.is_terminal() {
            // Late duplicate commit; keep the first outcome.
            let progress = ProgressSnapshot::from_job(&job, self.max_concurrent);
            return Ok(TaskEvents {
                file_processed: None,
                progress,
                terminal: None,
            });
        }

        task.finished_at = Some(now_ts());
        let payload = if cancelled {
            task.state = TaskState::SkippedCancel;
            task.outcome = None;
            Some(FileProcessedPayload {
                queue_id: job_id.to_string(),
                file_path: task.file_name.clone(),
                task_id,
                state: TaskState::SkippedCancel,
                success: false,
                format: None,
                size: None,
                file_size: None,
                cache_hit: None,
                error: None,
                error_code: None,
            })
        } else {
            match outcome {
                Ok(success) => {
                    task.state = TaskState::Succeeded;
                    let payload = FileProcessedPayload {
                        queue_id: job_id.to_string(),
                        file_path: task.file_name.clone(),
                        task_id,
                        state: TaskState::Succeeded,
                        success: true,
                        format: Some(success.format.clone()),
                        size: Some((success.width, success.height)),
                        file_size: Some(success.byte_size),
                        cache_hit: Some(success.cache_hit),
                        error: None,
                        error_code: None,
                    };
                    task.outcome = Some(TaskOutcome::Success(success));
                    Some(payload)
                }
                Err(error) => {
                    task.state = TaskState::Failed;
                    let payload = FileProcessedPayload {
                        queue_id: job_id.to_string(),
                        file_path: task.file_name.clone(),
                        task_id,
                        state: TaskState::Failed,
                        success: false,
                        format: None,
                        size: None,
                        file_size: None,
                        cache_hit: None,
                        error: Some(error.message.clone()),
                        error_code: Some(error.kind),
                    };
                    task.outcome = Some(TaskOutcome::Failure {
                        kind: error.kind,
                        message: error.message,
                    });
                    Some(payload)
                }
            }
        };

        Ok(Self::collect_events(&mut job, payload, self.max_concurrent))
    }

    fn skip_task(job: &mut Job, task_id: usize) -> Option<FileProcessedPayload> {
        let queue_id = job.job_id.clone();
        let task = job.tasks.get_mut(task_id)?;
        if task.state.is_terminal() {
            return None;
        }
        task.state = TaskState::SkippedCancel;
        task.finished_at = Some(now_ts());
        Some(FileProcessedPayload {
            queue_id,
            file_path: task.file_name.clone(),
            task_id,
            state: TaskState::SkippedCancel,
            success: false,
            format: None,
            size: None,
            file_size: None,
            cache_hit: None,
            error: None,
            error_code: None,
        })
    }

    /// Recount, derive the terminal transition if this commit finished
    /// the job, and bundle the events the caller should publish.
    fn collect_events(
        job: &mut Job,
        file_processed: Option<FileProcessedPayload>,
        max_concurrent: usize,
    ) -> TaskEvents {
        job.recount();
        job.refresh_current_file_hint();

        let mut terminal = None;
        if job.all_tasks_terminal() {
            if job.state == JobState::Running {
                job.state = JobState::Completed;
            }
            if job.state.is_terminal() {
                if job.finished_at.is_none() {
                    job.finished_at = Some(now_ts());
                }
                if !job.terminal_event_sent {
                    job.terminal_event_sent = true;
                    let snapshot = ProgressSnapshot::from_job(job, max_concurrent);
                    terminal = Some(match job.state {
                        JobState::Cancelled => ProgressEvent::BatchCancelled(snapshot),
                        JobState::Failed => ProgressEvent::BatchError {
                            queue_id: job.job_id.clone(),
                            error: job
                                .failure_reason
                                .clone()
                                .unwrap_or_else(|| "Batch failed".to_string()),
                            error_code: ErrorKind::Internal,
                        },
                        _ => ProgressEvent::BatchCompleted(snapshot),
                    });
                }
            }
        }

        TaskEvents {
            file_processed,
            progress: ProgressSnapshot::from_job(job, max_concurrent),
            terminal,
        }
    }

    /// Cancel a job. Pending tasks are drained immediately; running
    /// tasks commit as SKIPPED_CANCEL when they next check. Idempotent
    /// in terminal states.
    pub fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let job = self.job(job_id)?;
        let mut job = job.lock().unwrap();

        let prior_status = job.state.wire_status();
        if job.state.is_terminal() {
            return Ok(CancelOutcome {
                prior_status,
                changed: false,
                events: None,
            });
        }

        job.state = JobState::Cancelled;
        let pending: Vec<usize> = job
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Pending)
            .map(|t| t.task_id)
            .collect();
        for task_id in pending {
            Self::skip_task(&mut job, task_id);
        }
        job.recount();
        job.refresh_current_file_hint();

        let mut terminal = None;
        if job.all_tasks_terminal() {
            job.finished_at = Some(now_ts());
            if !job.terminal_event_sent {
                job.terminal_event_sent = true;
                terminal = Some(ProgressSnapshot::from_job(&job, self.max_concurrent));
            }
        }

        info!("Cancelled job {} (was {})", job_id, prior_status);
        Ok(CancelOutcome {
            prior_status,
            changed: true,
            events: Some(CancelEvents {
                progress: ProgressSnapshot::from_job(&job, self.max_concurrent),
                terminal,
            }),
        })
    }

    /// Transition a RUNNING job to FAILED (e.g. worker pool backlog
    /// exhausted). Undispatched tasks are drained as skipped.
    pub fn fail_job(&self, job_id: &str, reason: impl Into<String>) -> Result<Option<ProgressEvent>> {
        let job = self.job(job_id)?;
        let mut job = job.lock().unwrap();
        if job.state.is_terminal() {
            return Ok(None);
        }
        let reason = reason.into();
        job.state = JobState::Failed;
        job.failure_reason = Some(reason.clone());
        let pending: Vec<usize> = job
            .tasks
            .iter()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.task_id)
            .collect();
        for task_id in pending {
            Self::skip_task(&mut job, task_id);
        }
        job.recount();
        job.finished_at = Some(now_ts());

        if !job.terminal_event_sent {
            job.terminal_event_sent = true;
            Ok(Some(ProgressEvent::BatchError {
                queue_id: job_id.to_string(),
                error: reason,
                error_code: ErrorKind::QueueFull,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn snapshot(&self, job_id: &str) -> Result<ProgressSnapshot> {
        let job = self.job(job_id)?;
        let job = job.lock().unwrap();
        Ok(ProgressSnapshot::from_job(&job, self.max_concurrent))
    }

    pub fn summary(&self, job_id: &str) -> Result<JobSummary> {
        let job = self.job(job_id)?;
        let job = job.lock().unwrap();
        Ok(Self::summarize(&job, self.max_concurrent))
    }

    fn summarize(job: &Job, max_concurrent: usize) -> JobSummary {
        let pending = job
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Pending)
            .count();
        let processing = job
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .count();
        JobSummary {
            queue_id: job.job_id.clone(),
            status: job.state.wire_status().to_string(),
            total_files: job.counters.total,
            pending_files: pending,
            processing_files: processing,
            completed_files: job.counters.completed,
            error_files: job.counters.failed,
            created_time: job.created_at,
            started_time: job.started_at,
            completed_time: job.finished_at,
            cancelled: job.state == JobState::Cancelled,
            max_concurrent,
        }
    }

    pub fn list_active(&self) -> Vec<JobId> {
        let jobs = self.jobs.read().unwrap();
        jobs.iter()
            .filter(|(_, job)| !job.lock().unwrap().state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn live_job_ids(&self) -> HashSet<JobId> {
        self.jobs.read().unwrap().keys().cloned().collect()
    }

    pub fn list_all_summaries(&self) -> HashMap<JobId, JobSummary> {
        let jobs = self.jobs.read().unwrap();
        jobs.iter()
            .map(|(id, job)| {
                let job = job.lock().unwrap();
                (id.clone(), Self::summarize(&job, self.max_concurrent))
            })
            .collect()
    }

    pub fn statistics(&self) -> BatchStatistics {
        let jobs = self.jobs.read().unwrap();
        let mut stats = BatchStatistics {
            total_queues: jobs.len(),
            active_queues: 0,
            completed_queues: 0,
            cancelled_queues: 0,
            error_queues: 0,
            total_files: 0,
            completed_files: 0,
            max_concurrent: self.max_concurrent,
            max_queue_size: self.max_queue_size,
        };
        for job in jobs.values() {
            let job = job.lock().unwrap();
            match job.state {
                JobState::Created | JobState::Running => stats.active_queues += 1,
                JobState::Completed => stats.completed_queues += 1,
                JobState::Cancelled => stats.cancelled_queues += 1,
                JobState::Failed => stats.error_queues += 1,
            }
            stats.total_files += job.counters.total;
            stats.completed_files += job.counters.completed;
        }
        stats
    }

    /// Remove terminal jobs older than `max_age`. Returns the number
    /// removed.
    pub fn reap(&self, max_age: Duration) -> usize {
        let cutoff = now_ts() - max_age.as_secs_f64();
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let job = job.lock().unwrap();
            if !job.state.is_terminal() {
                return true;
            }
            let reference = job.finished_at.unwrap_or(job.created_at);
            reference > cutoff
        });
        let removed = before - jobs.len();
        if removed > 0 {
            info!("Reaped {} terminal jobs", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(name: &str) -> AdmittedFile {
        AdmittedFile {
            file_name: name.to_string(),
            bytes: Arc::new(vec![1, 2, 3]),
            fingerprint: format!("fp-{}", name),
        }
    }

    fn registry_with_job(files: usize) -> (JobRegistry, JobId) {
        let registry = JobRegistry::new(2, 100);
        let files: Vec<AdmittedFile> = (0..files).map(|i| admitted(&format!("f{}.png", i))).collect();
        let job_id = registry.create_job(ProcessingOptions::default(), files, Vec::new());
        registry.start_running(&job_id).unwrap();
        (registry, job_id)
    }

    fn success() -> TaskSuccess {
        TaskSuccess {
            format: "PNG".to_string(),
            width: 4,
            height: 4,
            byte_size: 99,
            fingerprint: "fp".to_string(),
            cache_hit: false,
        }
    }

    #[test]
    fn create_and_snapshot() {
        let (registry, job_id) = registry_with_job(3);
        let snap = registry.snapshot(&job_id).unwrap();
        assert_eq!(snap.total_files, 3);
        assert_eq!(snap.completed_files, 0);
        assert_eq!(snap.status, "processing");
    }

    #[test]
    fn unknown_job_is_an_error() {
        let registry = JobRegistry::new(2, 100);
        let err = registry.snapshot("nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::JobNotFound);
    }

    #[test]
    fn full_lifecycle_to_completed() {
        let (registry, job_id) = registry_with_job(2);

        for task_id in 0..2 {
            match registry.try_begin_task(&job_id, task_id).unwrap() {
                TaskStart::Run { file_name, .. } => {
                    assert_eq!(file_name, format!("f{}.png", task_id))
                }
                TaskStart::Skipped(_) => panic!("task should run"),
            }
        }

        let events = registry.finish_task(&job_id, 0, Ok(success())).unwrap();
        assert!(events.file_processed.is_some());
        assert!(events.terminal.is_none());

        let events = registry.finish_task(&job_id, 1, Ok(success())).unwrap();
        let terminal = events.terminal.expect("last commit finishes the job");
        assert_eq!(terminal.event_name(), "batch_completed");

        let snap = registry.snapshot(&job_id).unwrap();
        assert_eq!(snap.status, "completed");
        assert_eq!(snap.completed_files, 2);
        assert_eq!(snap.successful_files, Some(2));
    }

    #[test]
    fn per_file_failure_does_not_abort_job() {
        let (registry, job_id) = registry_with_job(2);
        registry.try_begin_task(&job_id, 0).unwrap();
        registry.try_begin_task(&job_id, 1).unwrap();

        registry
            .finish_task(&job_id, 0, Err(ConvertError::codec_failed("bad pixels")))
            .unwrap();
        let events = registry.finish_task(&job_id, 1, Ok(success())).unwrap();
        assert!(events.terminal.is_some());

        let snap = registry.snapshot(&job_id).unwrap();
        assert_eq!(snap.status, "completed");
        assert_eq!(snap.failed_files, Some(1));
        assert_eq!(snap.successful_files, Some(1));
        let details = snap.failed_file_details.unwrap();
        assert_eq!(details[0].error_code, ErrorKind::CodecFailed);
    }

    #[test]
    fn cancel_drains_pending_and_is_idempotent() {
        let (registry, job_id) = registry_with_job(5);
        // Task 0 is mid-flight.
        registry.try_begin_task(&job_id, 0).unwrap();

        let outcome = registry.cancel(&job_id).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.prior_status, "processing");
        // Terminal event not yet emitted: task 0 is still running.
        assert!(outcome.events.as_ref().unwrap().terminal.is_none());

        // The in-flight task commits; its outcome is discarded.
        let events = registry.finish_task(&job_id, 0, Ok(success())).unwrap();
        let terminal = events.terminal.expect("drain completes the job");
        assert_eq!(terminal.event_name(), "batch_cancelled");

        let snap = registry.snapshot(&job_id).unwrap();
        assert_eq!(snap.status, "cancelled");
        assert_eq!(snap.completed_files, 5);
        assert_eq!(snap.skipped_files, Some(5));

        // Second cancel is a no-op.
        let again = registry.cancel(&job_id).unwrap();
        assert!(!again.changed);
        assert_eq!(again.prior_status, "cancelled");
        let snap_after = registry.snapshot(&job_id).unwrap();
        assert_eq!(snap_after.completed_files, 5);
    }

    #[test]
    fn cancel_with_no_running_tasks_emits_terminal_immediately() {
        let (registry, job_id) = registry_with_job(3);
        let outcome = registry.cancel(&job_id).unwrap();
        let events = outcome.events.unwrap();
        assert!(events.terminal.is_some());
        assert_eq!(events.progress.status, "cancelled");
    }

    #[test]
    fn begin_after_cancel_skips_without_running() {
        let (registry, job_id) = registry_with_job(2);
        registry.cancel(&job_id).unwrap();
        match registry.try_begin_task(&job_id, 1).unwrap() {
            TaskStart::Run { .. } => panic!("cancelled job must not run tasks"),
            TaskStart::Skipped(_) => {}
        }
    }

    #[test]
    fn counters_stay_consistent_at_every_observation() {
        let (registry, job_id) = registry_with_job(4);
        let check = |registry: &JobRegistry| {
            let snap = registry.snapshot(&job_id).unwrap();
            let succeeded = snap.successful_files.unwrap_or(0);
            assert!(snap.completed_files <= snap.total_files);
            if snap.status == "completed" {
                assert_eq!(snap.completed_files, snap.total_files);
                assert_eq!(
                    snap.completed_files,
                    succeeded + snap.failed_files.unwrap() + snap.skipped_files.unwrap()
                );
            }
        };

        for task_id in 0..4 {
            registry.try_begin_task(&job_id, task_id).unwrap();
            check(&registry);
            let outcome = if task_id % 2 == 0 {
                Ok(success())
            } else {
                Err(ConvertError::codec_failed("x"))
            };
            registry.finish_task(&job_id, task_id, outcome).unwrap();
            check(&registry);
        }
    }

    #[test]
    fn fail_job_marks_error_state() {
        let (registry, job_id) = registry_with_job(3);
        let event = registry.fail_job(&job_id, "Worker pool backlog exhausted").unwrap();
        assert!(event.is_some());
        let snap = registry.snapshot(&job_id).unwrap();
        assert_eq!(snap.status, "error");
        assert_eq!(snap.completed_files, 3);
    }

    #[test]
    fn reap_removes_only_old_terminal_jobs() {
        let (registry, done_id) = registry_with_job(1);
        registry.try_begin_task(&done_id, 0).unwrap();
        registry.finish_task(&done_id, 0, Ok(success())).unwrap();

        let active_id = registry.create_job(
            ProcessingOptions::default(),
            vec![admitted("live.png")],
            Vec::new(),
        );
        registry.start_running(&active_id).unwrap();

        // max_age of zero reaps every terminal job, leaves active ones.
        let removed = registry.reap(Duration::from_secs(0));
        assert_eq!(removed, 1);
        assert!(registry.snapshot(&done_id).is_err());
        assert!(registry.snapshot(&active_id).is_ok());
    }

    #[test]
    fn statistics_aggregates_states() {
        let (registry, a) = registry_with_job(2);
        registry.try_begin_task(&a, 0).unwrap();
        registry.try_begin_task(&a, 1).unwrap();
        registry.finish_task(&a, 0, Ok(success())).unwrap();
        registry.finish_task(&a, 1, Ok(success())).unwrap();

        let b = registry.create_job(
            ProcessingOptions::default(),
            vec![admitted("x.png")],
            Vec::new(),
        );
        registry.start_running(&b).unwrap();
        registry.cancel(&b).unwrap();

        let stats = registry.statistics();
        assert_eq!(stats.total_queues, 2);
        assert_eq!(stats.completed_queues, 1);
        assert_eq!(stats.cancelled_queues, 1);
        assert_eq!(stats.total_files, 3);
    }
}
