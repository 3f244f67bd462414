//! Bounded-concurrency executor for file tasks.
//!
//! N worker loops pull `(job_id, task_id)` pairs from a shared bounded
//! queue. Submission is non-blocking: a full backlog rejects with
//! QUEUE_FULL. Codec calls run on the blocking pool so the async
//! runtime never stalls on pixel math.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::models::{JobId, TaskSuccess};
use super::registry::{JobRegistry, TaskEvents, TaskStart};
use crate::cache::{ArtifactMeta, ConversionCache, StoredArtifact};
use crate::codec::ImageCodec;
use crate::error::{ConvertError, Result};
use crate::events::{ProgressBus, ProgressEvent};
use crate::server::metrics::{record_conversion, record_job_finished};

/// A queued unit of work.
#[derive(Debug, Clone)]
pub struct TaskRef {
    pub job_id: JobId,
    pub task_id: usize,
}

/// Shared dependencies every worker loop needs.
pub struct WorkerContext {
    pub registry: Arc<JobRegistry>,
    pub cache: Arc<ConversionCache>,
    pub codec: Arc<dyn ImageCodec>,
    pub bus: Arc<ProgressBus>,
}

pub struct WorkerPool {
    queue_tx: mpsc::Sender<TaskRef>,
    // Keeps the channel open even if every worker loop has exited, so
    // submission failures always mean a full backlog, not a shutdown race.
    _queue_rx: Arc<Mutex<mpsc::Receiver<TaskRef>>>,
}

impl WorkerPool {
    /// Spawn `workers` loops sharing one bounded queue of `backlog`
    /// slots.
    pub fn start(
        workers: usize,
        backlog: usize,
        ctx: Arc<WorkerContext>,
        shutdown: CancellationToken,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel::<TaskRef>(backlog.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        for worker_id in 0..workers.max(1) {
            let ctx = ctx.clone();
            let queue_rx = queue_rx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                debug!(worker_id, "Worker started");
                loop {
                    let task = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        task = async { queue_rx.lock().await.recv().await } => task,
                    };
                    match task {
                        Some(task) => execute_task(&ctx, task).await,
                        None => break,
                    }
                }
                debug!(worker_id, "Worker stopped");
            });
        }

        Self {
            queue_tx,
            _queue_rx: queue_rx,
        }
    }

    /// Non-blocking submission. Fails with QUEUE_FULL once the backlog
    /// is exhausted.
    pub fn submit(&self, task: TaskRef) -> Result<()> {
        self.queue_tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ConvertError::queue_full("Worker pool backlog exhausted")
            }
            mpsc::error::TrySendError::Closed(_) => {
                ConvertError::internal("Worker pool is shut down")
            }
        })
    }
}

async fn execute_task(ctx: &WorkerContext, task: TaskRef) {
    let TaskRef { job_id, task_id } = task;

    let start = match ctx.registry.try_begin_task(&job_id, task_id) {
        Ok(start) => start,
        Err(e) => {
            // Job reaped while the task sat in the queue.
            warn!("Dropping task {}/{}: {}", job_id, task_id, e);
            return;
        }
    };

    let (file_name, bytes, fingerprint, options) = match start {
        TaskStart::Skipped(events) => {
            publish_events(ctx, events);
            return;
        }
        TaskStart::Run {
            file_name,
            bytes,
            fingerprint,
            options,
        } => (file_name, bytes, fingerprint, options),
    };

    debug!("Processing {} ({}/{})", file_name, job_id, task_id);

    let codec = ctx.codec.clone();
    let produced = ctx
        .cache
        .get_or_compute(&fingerprint, move || async move {
            let result = tokio::task::spawn_blocking(move || codec.process(&bytes, &options))
                .await
                .map_err(|e| ConvertError::internal(format!("Codec task panicked: {}", e)))??;
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
        .await;

    let outcome = produced.map(|(artifact, was_hit)| TaskSuccess {
        format: artifact.meta.format.clone(),
        width: artifact.meta.width,
        height: artifact.meta.height,
        byte_size: artifact.meta.size_bytes,
        fingerprint: fingerprint.clone(),
        cache_hit: was_hit,
    });
    record_conversion("batch", outcome.is_ok());

    match ctx.registry.finish_task(&job_id, task_id, outcome) {
        Ok(events) => publish_events(ctx, events),
        Err(e) => error!("Failed to commit task {}/{}: {}", job_id, task_id, e),
    }
}

fn publish_events(ctx: &WorkerContext, events: TaskEvents) {
    if let Some(payload) = events.file_processed {
        ctx.bus.publish(&ProgressEvent::FileProcessed(payload));
    }
    ctx.bus
        .publish(&ProgressEvent::BatchProgress(events.progress));
    if let Some(terminal) = events.terminal {
        ctx.bus.publish(&terminal);
        record_job_finished();
    }
}
