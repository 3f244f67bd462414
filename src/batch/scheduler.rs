//! Top-level batch lifecycle: admission, job creation, dispatch,
//! cancellation, cleanup.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::models::*;
use super::registry::{AdmittedFile, JobRegistry};
use super::worker::{TaskRef, WorkerPool};
use crate::cache::{ArtifactMeta, ConversionCache, StoredArtifact};
use crate::codec::{fingerprint, ImageCodec, ProcessingOptions};
use crate::error::{ConvertError, Result};
use crate::events::{ProgressBus, ProgressEvent};
use crate::server::metrics::{record_job_finished, record_job_started};
use crate::validation::SecurityValidator;

/// One uploaded file awaiting admission.
#[derive(Debug, Clone)]
pub struct BatchFileInput {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Successful batch admission.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStarted {
    pub queue_id: JobId,
    pub total_files: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Why a batch was not started.
#[derive(Debug)]
pub enum StartBatchError {
    /// Malformed request (empty file list, oversized batch, ...).
    Invalid(ConvertError),
    /// Every file failed admission; no job was created.
    AllRejected(Vec<FileRejection>),
    /// The worker pool backlog was exhausted mid-dispatch; the job was
    /// created and then transitioned to FAILED.
    Capacity { job_id: JobId, error: ConvertError },
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupStats {
    pub cleaned_queues: usize,
    pub cleaned_tracking: usize,
}

pub struct BatchScheduler {
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    validator: Arc<SecurityValidator>,
    cache: Arc<ConversionCache>,
    codec: Arc<dyn ImageCodec>,
    bus: Arc<ProgressBus>,
    max_queue_size: usize,
}

impl BatchScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<JobRegistry>,
        pool: WorkerPool,
        validator: Arc<SecurityValidator>,
        cache: Arc<ConversionCache>,
        codec: Arc<dyn ImageCodec>,
        bus: Arc<ProgressBus>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            registry,
            pool,
            validator,
            cache,
            codec,
            bus,
            max_queue_size,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    /// Validate, create, and dispatch a batch.
    ///
    /// Files that fail admission are reported as warnings; if every
    /// file is rejected no job is created.
    pub fn start_batch(
        &self,
        files: Vec<BatchFileInput>,
        options: ProcessingOptions,
        mut warnings: Vec<String>,
    ) -> std::result::Result<BatchStarted, StartBatchError> {
        if files.is_empty() {
            return Err(StartBatchError::Invalid(ConvertError::input_invalid(
                "No files provided",
            )));
        }
        if files.len() > self.max_queue_size {
            return Err(StartBatchError::Invalid(ConvertError::queue_full(format!(
                "Queue size limit exceeded. Maximum {} files allowed.",
                self.max_queue_size
            ))));
        }

        let mut admitted = Vec::new();
        let mut rejections = Vec::new();
        for file in files {
            let report = self.validator.validate(&file.file_name, &file.bytes);
            match SecurityValidator::admission_error(&report) {
                None => {
                    let fp = fingerprint(&file.bytes, &options);
                    admitted.push(AdmittedFile {
                        file_name: file.file_name,
                        bytes: Arc::new(file.bytes),
                        fingerprint: fp,
                    });
                }
                Some(error) => {
                    warn!("Rejected {} at admission: {}", file.file_name, error);
                    rejections.push(FileRejection {
                        file_name: file.file_name,
                        error,
                    });
                }
            }
        }

        if admitted.is_empty() {
            return Err(StartBatchError::AllRejected(rejections));
        }
        for rejection in &rejections {
            warnings.push(format!(
                "{} rejected: {}",
                rejection.file_name, rejection.error
            ));
        }

        let total_files = admitted.len();
        let job_id = self
            .registry
            .create_job(options, admitted, warnings.clone());
        if let Err(error) = self.registry.start_running(&job_id) {
            return Err(StartBatchError::Invalid(error));
        }
        record_job_started();

        self.bus.publish(&ProgressEvent::BatchStarted {
            queue_id: job_id.clone(),
            total_files,
        });

        for task_id in 0..total_files {
            let task = TaskRef {
                job_id: job_id.clone(),
                task_id,
            };
            if let Err(error) = self.pool.submit(task) {
                warn!("Dispatch of job {} failed: {}", job_id, error);
                match self.registry.fail_job(&job_id, error.message.clone()) {
                    Ok(Some(event)) => {
                        self.bus.publish(&event);
                        record_job_finished();
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to mark job {} as failed: {}", job_id, e),
                }
                return Err(StartBatchError::Capacity { job_id, error });
            }
        }

        info!("Started batch {} with {} files", job_id, total_files);
        Ok(BatchStarted {
            queue_id: job_id,
            total_files,
            warnings,
        })
    }

    /// Convert one file through the cache, sharing in-flight work with
    /// identical concurrent requests.
    pub async fn convert_single(
        &self,
        bytes: Vec<u8>,
        options: &ProcessingOptions,
    ) -> Result<(Arc<StoredArtifact>, bool)> {
        let fp = fingerprint(&bytes, options);
        let codec = self.codec.clone();
        let options = options.clone();
        self.cache
            .get_or_compute(&fp, move || async move {
                let result =
                    tokio::task::spawn_blocking(move || codec.process(&bytes, &options))
                        .await
                        .map_err(|e| {
                            ConvertError::internal(format!("Codec task panicked: {}", e))
                        })??;
                Ok(StoredArtifact {
                    meta: ArtifactMeta {
                        original_format: result.original_format.clone(),
                        original_width: result.original_width,
                        original_height: result.original_height,
                        format: result.format.clone(),
                        width: result.width,
                        height: result.height,
                        size_bytes: result.bytes.len() as u64,
                        created_at: chrono::Utc::now().timestamp(),
                    },
                    bytes: result.bytes,
                })
            })
            .await
    }

    pub fn progress(&self, job_id: &str) -> Result<ProgressSnapshot> {
        self.registry.snapshot(job_id)
    }

    /// Cancel a job and publish the resulting events. Idempotent in
    /// terminal states.
    pub fn cancel(&self, job_id: &str) -> Result<&'static str> {
        let outcome = self.registry.cancel(job_id)?;
        if let Some(events) = outcome.events {
            self.bus
                .publish(&ProgressEvent::BatchProgress(events.progress));
            if let Some(snapshot) = events.terminal {
                self.bus.publish(&ProgressEvent::BatchCancelled(snapshot));
                record_job_finished();
            }
        }
        Ok(outcome.prior_status)
    }

    /// Prune terminal jobs older than `max_age` plus the subscription
    /// rooms that no longer map to a live job.
    pub fn cleanup(&self, max_age: Duration) -> CleanupStats {
        let cleaned_queues = self.registry.reap(max_age);
        let cleaned_tracking = self.bus.prune_rooms(&self.registry.live_job_ids());
        CleanupStats {
            cleaned_queues,
            cleaned_tracking,
        }
    }

    pub fn list_active(&self) -> Vec<JobId> {
        self.registry.list_active()
    }

    pub fn statistics(&self) -> BatchStatistics {
        self.registry.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::worker::WorkerContext;
    use crate::cache::{CacheConfig, MemoryBackend};
    use crate::codec::ImageRsCodec;
    use crate::validation::{ValidatorConfig, SecurityValidator};
    use tokio_util::sync::CancellationToken;

    fn png_bytes(side: u32) -> Vec<u8> {
        use image::{DynamicImage, RgbImage};
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_fn(side, side, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 7])
        }))
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
        buf
    }

    fn scheduler(workers: usize, max_file_size: u64) -> (BatchScheduler, CancellationToken) {
        let codec: Arc<dyn ImageCodec> = Arc::new(ImageRsCodec);
        let registry = Arc::new(JobRegistry::new(workers, 100));
        let cache = Arc::new(ConversionCache::new(
            Arc::new(MemoryBackend::new()),
            CacheConfig::default(),
        ));
        let bus = Arc::new(ProgressBus::default());
        let validator = Arc::new(SecurityValidator::new(
            ValidatorConfig {
                max_file_size_bytes: max_file_size,
                ..Default::default()
            },
            codec.clone(),
        ));
        let shutdown = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            registry: registry.clone(),
            cache: cache.clone(),
            codec: codec.clone(),
            bus: bus.clone(),
        });
        let pool = WorkerPool::start(workers, 100, ctx, shutdown.clone());
        (
            BatchScheduler::new(registry, pool, validator, cache, codec, bus, 100),
            shutdown,
        )
    }

    async fn wait_terminal(scheduler: &BatchScheduler, job_id: &str) -> ProgressSnapshot {
        for _ in 0..300 {
            let snap = scheduler.progress(job_id).unwrap();
            if snap.status != "processing" && snap.status != "pending" {
                return snap;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", job_id);
    }

    #[tokio::test]
    async fn batch_of_three_succeeds() {
        let (scheduler, _shutdown) = scheduler(2, 10 * 1024 * 1024);
        let files = vec![
            BatchFileInput {
                file_name: "small.png".to_string(),
                bytes: png_bytes(100),
            },
            BatchFileInput {
                file_name: "medium.png".to_string(),
                bytes: png_bytes(500),
            },
            BatchFileInput {
                file_name: "large.png".to_string(),
                bytes: png_bytes(1000),
            },
        ];
        let options = ProcessingOptions {
            quality: 85,
            target_format: Some(crate::codec::TargetFormat::Jpeg),
            ..Default::default()
        };
        let started = scheduler.start_batch(files, options, Vec::new()).unwrap();
        assert_eq!(started.total_files, 3);
        assert!(started.warnings.is_empty());

        let snap = wait_terminal(&scheduler, &started.queue_id).await;
        assert_eq!(snap.status, "completed");
        assert_eq!(snap.successful_files, Some(3));
        assert_eq!(snap.progress_percentage, 100.0);
    }

    #[tokio::test]
    async fn mixed_rejection_and_codec_failure() {
        // 1 KB admission limit: the "oversized" file is pre-rejected.
        let (scheduler, _shutdown) = scheduler(2, 1024);
        let mut corrupt = png_bytes(20);
        corrupt.truncate(corrupt.len() / 3);

        let files = vec![
            BatchFileInput {
                file_name: "valid.png".to_string(),
                bytes: png_bytes(8),
            },
            BatchFileInput {
                file_name: "oversized.png".to_string(),
                bytes: png_bytes(200),
            },
            BatchFileInput {
                file_name: "corrupt.png".to_string(),
                bytes: corrupt,
            },
        ];

        let started = scheduler
            .start_batch(files, ProcessingOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(started.total_files, 2);
        assert_eq!(started.warnings.len(), 1);
        assert!(started.warnings[0].contains("oversized.png"));
        assert!(started.warnings[0].contains("FILE_TOO_LARGE"));

        let snap = wait_terminal(&scheduler, &started.queue_id).await;
        assert_eq!(snap.successful_files, Some(1));
        assert_eq!(snap.failed_files, Some(1));
        let details = snap.failed_file_details.unwrap();
        assert_eq!(details[0].file_path, "corrupt.png");
        assert_eq!(details[0].error_code, crate::error::ErrorKind::CodecFailed);
    }

    #[tokio::test]
    async fn all_rejected_creates_no_job() {
        let (scheduler, _shutdown) = scheduler(1, 16);
        let files = vec![BatchFileInput {
            file_name: "big.png".to_string(),
            bytes: png_bytes(64),
        }];
        match scheduler.start_batch(files, ProcessingOptions::default(), Vec::new()) {
            Err(StartBatchError::AllRejected(rejections)) => {
                assert_eq!(rejections.len(), 1);
                assert_eq!(
                    rejections[0].error.kind,
                    crate::error::ErrorKind::FileTooLarge
                );
            }
            other => panic!("expected AllRejected, got {:?}", other.map(|s| s.queue_id)),
        }
        assert!(scheduler.list_active().is_empty());
        assert_eq!(scheduler.statistics().total_queues, 0);
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let (scheduler, _shutdown) = scheduler(1, 1024);
        match scheduler.start_batch(Vec::new(), ProcessingOptions::default(), Vec::new()) {
            Err(StartBatchError::Invalid(e)) => {
                assert_eq!(e.kind, crate::error::ErrorKind::InputInvalid)
            }
            _ => panic!("expected Invalid"),
        }
    }

    #[tokio::test]
    async fn cancel_mid_batch_reaches_cancelled() {
        let (scheduler, _shutdown) = scheduler(2, 10 * 1024 * 1024);
        let files: Vec<BatchFileInput> = (0..10)
            .map(|i| BatchFileInput {
                file_name: format!("f{}.png", i),
                bytes: png_bytes(300 + i),
            })
            .collect();
        let started = scheduler
            .start_batch(files, ProcessingOptions::default(), Vec::new())
            .unwrap();

        let prior = scheduler.cancel(&started.queue_id).unwrap();
        assert_eq!(prior, "processing");

        let snap = wait_terminal(&scheduler, &started.queue_id).await;
        assert_eq!(snap.status, "cancelled");
        let total = snap.successful_files.unwrap()
            + snap.failed_files.unwrap()
            + snap.skipped_files.unwrap();
        assert_eq!(total, 10);

        // Repeated cancel does not change observed state.
        let prior = scheduler.cancel(&started.queue_id).unwrap();
        assert_eq!(prior, "cancelled");
        let snap_after = scheduler.progress(&started.queue_id).unwrap();
        assert_eq!(snap_after.completed_files, snap.completed_files);
    }

    #[tokio::test]
    async fn cleanup_reaps_terminal_jobs_and_rooms() {
        let (scheduler, _shutdown) = scheduler(2, 10 * 1024 * 1024);
        let started = scheduler
            .start_batch(
                vec![BatchFileInput {
                    file_name: "a.png".to_string(),
                    bytes: png_bytes(16),
                }],
                ProcessingOptions::default(),
                Vec::new(),
            )
            .unwrap();
        let _sub = scheduler.bus().subscribe(&started.queue_id);
        wait_terminal(&scheduler, &started.queue_id).await;

        let stats = scheduler.cleanup(Duration::from_secs(0));
        assert_eq!(stats.cleaned_queues, 1);
        assert_eq!(stats.cleaned_tracking, 1);
        assert!(scheduler.progress(&started.queue_id).is_err());
    }
}
