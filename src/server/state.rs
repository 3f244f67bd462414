use axum::extract::FromRef;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ServerConfig;
use crate::batch::{BatchScheduler, JobRegistry, WorkerContext, WorkerPool};
use crate::cache::{spawn_sweeper, CacheBackend, CacheConfig, ConversionCache, DiskBackend, MemoryBackend};
use crate::codec::{ImageCodec, ImageRsCodec};
use crate::config::{AppConfig, CacheBackendKind};
use crate::events::ProgressBus;
use crate::rate_limit::{RateLimiterConfig, TokenBucketLimiter};
use crate::validation::{SecurityValidator, ValidatorConfig};

pub type GuardedScheduler = Arc<BatchScheduler>;
pub type GuardedCache = Arc<ConversionCache>;
pub type GuardedValidator = Arc<SecurityValidator>;
pub type GuardedLimiter = Arc<TokenBucketLimiter>;
pub type GuardedCodec = Arc<dyn ImageCodec>;
pub type GuardedBus = Arc<ProgressBus>;

/// The composition root's output: every singleton the edge needs,
/// injected by constructor rather than looked up at runtime.
#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub scheduler: GuardedScheduler,
    pub cache: GuardedCache,
    pub validator: GuardedValidator,
    pub limiter: GuardedLimiter,
    pub codec: GuardedCodec,
    pub bus: GuardedBus,
}

impl ServerState {
    /// Construct the full component graph from resolved configuration.
    /// Spawns the worker pool and the cache sweeper; both stop when
    /// `shutdown` is cancelled.
    pub async fn build(config: &AppConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let codec: GuardedCodec = Arc::new(ImageRsCodec);

        let backend: Arc<dyn CacheBackend> = match config.cache.backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
            CacheBackendKind::Disk => Arc::new(DiskBackend::open(&config.cache.dir)?),
        };
        let cache = Arc::new(ConversionCache::new(
            backend,
            CacheConfig {
                max_bytes: config.cache.max_bytes(),
                max_entries: config.cache.max_entries,
                max_age: config.cache.max_age(),
            },
        ));
        let loaded = cache.load_persisted().await?;
        if loaded > 0 {
            info!("Cache warm-started with {} persisted entries", loaded);
        }
        spawn_sweeper(
            cache.clone(),
            config.cache.cleanup_interval(),
            shutdown.clone(),
        );

        let validator = Arc::new(SecurityValidator::new(
            ValidatorConfig {
                max_file_size_bytes: config.security.max_file_size_bytes(),
                allowed_mime_types: config.security.allowed_mime_types.clone(),
                deep_scan_enabled: config.security.enable_content_scan,
            },
            codec.clone(),
        ));

        let limiter = Arc::new(TokenBucketLimiter::new(RateLimiterConfig {
            capacity: config.security.rate_limit_burst_size,
            refill_rate_per_sec: config.security.rate_limit_requests_per_minute as f64 / 60.0,
        }));

        let registry = Arc::new(JobRegistry::new(
            config.processing.max_concurrent_files,
            config.processing.max_queue_size,
        ));
        let bus = Arc::new(ProgressBus::default());
        let pool = WorkerPool::start(
            config.processing.max_concurrent_files,
            config.processing.max_queue_size,
            Arc::new(WorkerContext {
                registry: registry.clone(),
                cache: cache.clone(),
                codec: codec.clone(),
                bus: bus.clone(),
            }),
            shutdown,
        );
        let scheduler = Arc::new(BatchScheduler::new(
            registry,
            pool,
            validator.clone(),
            cache.clone(),
            codec.clone(),
            bus.clone(),
            config.processing.max_queue_size,
        ));

        // Batches are multipart: leave generous headroom above the
        // single-file limit.
        let max_body_bytes = (config.security.max_file_size_bytes() as usize)
            .saturating_mul(config.processing.max_queue_size.min(32).max(2));

        Ok(Self {
            config: ServerConfig {
                port: config.port,
                metrics_port: config.metrics_port,
                requests_logging_level: config.logging_level.clone(),
                frontend_dir_path: config.frontend_dir_path.clone(),
                max_body_bytes,
            },
            start_time: Instant::now(),
            scheduler,
            cache,
            validator,
            limiter,
            codec,
            bus,
        })
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedScheduler {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler.clone()
    }
}

impl FromRef<ServerState> for GuardedCache {
    fn from_ref(input: &ServerState) -> Self {
        input.cache.clone()
    }
}

impl FromRef<ServerState> for GuardedValidator {
    fn from_ref(input: &ServerState) -> Self {
        input.validator.clone()
    }
}

impl FromRef<ServerState> for GuardedLimiter {
    fn from_ref(input: &ServerState) -> Self {
        input.limiter.clone()
    }
}

impl FromRef<ServerState> for GuardedCodec {
    fn from_ref(input: &ServerState) -> Self {
        input.codec.clone()
    }
}

impl FromRef<ServerState> for GuardedBus {
    fn from_ref(input: &ServerState) -> Self {
        input.bus.clone()
    }
}
