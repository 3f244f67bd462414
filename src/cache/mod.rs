//! Content-addressed conversion cache.
//!
//! Maps fingerprint -> artifact with single-flight coalescing: for any
//! fingerprint at most one producer runs at a time, and every
//! concurrent caller for that key receives the same artifact or the
//! same error. Eviction is LRU over size and entry-count budgets, with
//! a periodic age sweep on a background task.

mod backend;

pub use backend::{ArtifactMeta, CacheBackend, DiskBackend, MemoryBackend, StoredArtifact};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, Result};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_bytes: u64,
    pub max_entries: usize,
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            max_entries: 1000,
            max_age: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    size_bytes: u64,
    created_at: i64,
    /// Monotonic access sequence used for LRU ordering.
    lru_seq: u64,
}

#[derive(Default)]
struct CacheIndex {
    entries: HashMap<String, IndexEntry>,
    total_bytes: u64,
    /// Keys currently referenced by a pending get_or_compute; never
    /// eviction candidates.
    pinned: HashMap<String, usize>,
}

impl CacheIndex {
    fn pin(&mut self, key: &str) {
        *self.pinned.entry(key.to_string()).or_insert(0) += 1;
    }

    fn unpin(&mut self, key: &str) {
        if let Some(count) = self.pinned.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(key);
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }
}

type FlightResult = std::result::Result<Arc<StoredArtifact>, ConvertError>;

/// Snapshot of cache statistics, exposed by `/api/cache/status`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate_percent: f64,
    pub entries: usize,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub max_bytes: u64,
    pub max_entries: usize,
    pub size_utilization_percent: f64,
    pub evictions: u64,
    pub expired_entries_removed: u64,
    pub cleanup_runs: u64,
    pub max_age_hours: f64,
}

/// Result of a sweep or manual cleanup run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOutcome {
    pub entries_removed: usize,
    pub bytes_freed: u64,
}

pub struct ConversionCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    index: Mutex<CacheIndex>,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<FlightResult>>>>,
    access_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removed: AtomicU64,
    cleanup_runs: AtomicU64,
}

impl ConversionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            index: Mutex::new(CacheIndex::default()),
            in_flight: Mutex::new(HashMap::new()),
            access_seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_removed: AtomicU64::new(0),
            cleanup_runs: AtomicU64::new(0),
        }
    }

    /// Rebuild the index from the backend (disk persistence across
    /// restarts), then enforce budgets.
    pub async fn load_persisted(&self) -> anyhow::Result<usize> {
        let persisted = self.backend.load_index().await?;
        let count = persisted.len();
        {
            let mut index = self.index.lock().unwrap();
            for (key, meta) in persisted {
                let seq = self.access_seq.fetch_add(1, Ordering::Relaxed);
                index.total_bytes += meta.size_bytes;
                index.entries.insert(
                    key,
                    IndexEntry {
                        size_bytes: meta.size_bytes,
                        created_at: meta.created_at,
                        lru_seq: seq,
                    },
                );
            }
        }
        let evicted = self.enforce_budgets().await;
        if count > 0 {
            info!(
                "Loaded {} cached entries from backend ({} evicted over budget)",
                count, evicted.entries_removed
            );
        }
        Ok(count)
    }

    /// Return the cached artifact for `fingerprint`, or elect this
    /// caller to run `producer` while concurrent callers for the same
    /// key wait for the shared result.
    ///
    /// Returns `(artifact, was_hit)`; followers of an in-flight
    /// producer count as hits.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &str,
        producer: F,
    ) -> Result<(Arc<StoredArtifact>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StoredArtifact>>,
    {
        if let Some(artifact) = self.fetch_existing(fingerprint).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((artifact, true));
        }

        enum Role {
            Producer(watch::Sender<Option<FlightResult>>),
            Follower(watch::Receiver<Option<FlightResult>>),
        }

        let role = {
            let mut in_flight = self.in_flight.lock().unwrap();
            match in_flight.get(fingerprint) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(fingerprint.to_string(), rx);
                    Role::Producer(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => loop {
                let settled = rx.borrow().clone();
                if let Some(result) = settled {
                    if result.is_ok() {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                    }
                    return result.map(|artifact| (artifact, true));
                }
                if rx.changed().await.is_err() {
                    return Err(ConvertError::internal(
                        "Cache computation was abandoned by its producer",
                    ));
                }
            },
            Role::Producer(tx) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let result: FlightResult = match producer().await {
                    Ok(artifact) => {
                        let artifact = Arc::new(artifact);
                        self.store(fingerprint, &artifact).await;
                        Ok(artifact)
                    }
                    Err(e) => Err(e),
                };
                // Publish before removing the in-flight slot so late
                // followers either see the settled value or a fresh miss.
                let _ = tx.send(Some(result.clone()));
                self.in_flight.lock().unwrap().remove(fingerprint);
                result.map(|artifact| (artifact, false))
            }
        }
    }

    /// Read-only lookup; counts toward hit/miss statistics.
    pub async fn lookup(&self, fingerprint: &str) -> Option<Arc<StoredArtifact>> {
        match self.fetch_existing(fingerprint).await {
            Some(artifact) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(artifact)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn fetch_existing(&self, fingerprint: &str) -> Option<Arc<StoredArtifact>> {
        {
            let mut index = self.index.lock().unwrap();
            if !index.entries.contains_key(fingerprint) {
                return None;
            }
            index.pin(fingerprint);
        }

        let fetched = self.backend.get(fingerprint).await;

        let mut index = self.index.lock().unwrap();
        index.unpin(fingerprint);
        match fetched {
            Ok(Some(artifact)) => {
                if let Some(entry) = index.entries.get_mut(fingerprint) {
                    entry.lru_seq = self.access_seq.fetch_add(1, Ordering::Relaxed);
                }
                Some(Arc::new(artifact))
            }
            Ok(None) => {
                // Index drifted from the backend; drop the stale entry.
                index.remove(fingerprint);
                None
            }
            Err(e) => {
                warn!("Cache backend read failed, treating as miss: {:#}", e);
                None
            }
        }
    }

    async fn store(&self, fingerprint: &str, artifact: &Arc<StoredArtifact>) {
        {
            let mut index = self.index.lock().unwrap();
            index.pin(fingerprint);
        }

        let put_result = self.backend.put(fingerprint, artifact).await;

        {
            let mut index = self.index.lock().unwrap();
            match put_result {
                Ok(()) => {
                    let size = artifact.bytes.len() as u64;
                    if let Some(old) = index.remove(fingerprint) {
                        debug!("Replacing cache entry {} ({} bytes)", fingerprint, old.size_bytes);
                    }
                    index.total_bytes += size;
                    index.entries.insert(
                        fingerprint.to_string(),
                        IndexEntry {
                            size_bytes: size,
                            created_at: artifact.meta.created_at,
                            lru_seq: self.access_seq.fetch_add(1, Ordering::Relaxed),
                        },
                    );
                }
                Err(e) => {
                    // The caller still gets its artifact; only reuse is lost.
                    warn!("Cache backend write failed: {:#}", e);
                }
            }
            index.unpin(fingerprint);
        }

        self.enforce_budgets().await;
    }

    /// Evict LRU entries until size and entry budgets hold. Pinned
    /// entries are skipped.
    async fn enforce_budgets(&self) -> SweepOutcome {
        let victims = {
            let mut index = self.index.lock().unwrap();
            let mut victims = Vec::new();
            while index.total_bytes > self.config.max_bytes
                || index.entries.len() > self.config.max_entries
            {
                let candidate = index
                    .entries
                    .iter()
                    .filter(|(key, _)| !index.pinned.contains_key(*key))
                    .min_by_key(|(_, entry)| entry.lru_seq)
                    .map(|(key, _)| key.clone());
                match candidate {
                    Some(key) => {
                        if let Some(entry) = index.remove(&key) {
                            victims.push((key, entry.size_bytes));
                        }
                    }
                    None => break,
                }
            }
            victims
        };

        let mut outcome = SweepOutcome::default();
        for (key, size) in victims {
            outcome.entries_removed += 1;
            outcome.bytes_freed += size;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.backend.delete(&key).await {
                warn!("Failed to delete evicted cache entry {}: {:#}", key, e);
            }
        }
        outcome
    }

    /// Remove entries older than `max_age`, then re-enforce budgets.
    pub async fn sweep(&self) -> SweepOutcome {
        self.cleanup_runs.fetch_add(1, Ordering::Relaxed);
        let cutoff = chrono::Utc::now().timestamp() - self.config.max_age.as_secs() as i64;

        let expired: Vec<(String, u64)> = {
            let mut index = self.index.lock().unwrap();
            let keys: Vec<String> = index
                .entries
                .iter()
                .filter(|(key, entry)| {
                    entry.created_at < cutoff && !index.pinned.contains_key(*key)
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| index.remove(&key).map(|entry| (key, entry.size_bytes)))
                .collect()
        };

        let mut outcome = SweepOutcome::default();
        for (key, size) in expired {
            outcome.entries_removed += 1;
            outcome.bytes_freed += size;
            self.expired_removed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.backend.delete(&key).await {
                warn!("Failed to delete expired cache entry {}: {:#}", key, e);
            }
        }

        let evicted = self.enforce_budgets().await;
        outcome.entries_removed += evicted.entries_removed;
        outcome.bytes_freed += evicted.bytes_freed;
        outcome
    }

    pub async fn invalidate(&self, fingerprint: &str) {
        let removed = {
            let mut index = self.index.lock().unwrap();
            index.remove(fingerprint).is_some()
        };
        if removed {
            if let Err(e) = self.backend.delete(fingerprint).await {
                warn!("Failed to delete invalidated cache entry {}: {:#}", fingerprint, e);
            }
        }
    }

    /// Drop every entry. Returns `(entries_removed, bytes_freed)`.
    pub async fn clear(&self) -> (usize, u64) {
        let drained: Vec<(String, u64)> = {
            let mut index = self.index.lock().unwrap();
            let keys: Vec<String> = index.entries.keys().cloned().collect();
            keys.into_iter()
                .filter_map(|key| index.remove(&key).map(|entry| (key, entry.size_bytes)))
                .collect()
        };

        let mut freed = 0u64;
        for (key, size) in &drained {
            freed += size;
            if let Err(e) = self.backend.delete(key).await {
                warn!("Failed to delete cache entry {} on clear: {:#}", key, e);
            }
        }
        (drained.len(), freed)
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, size_bytes) = {
            let index = self.index.lock().unwrap();
            (index.entries.len(), index.total_bytes)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let utilization = if self.config.max_bytes > 0 {
            size_bytes as f64 / self.config.max_bytes as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            total_requests: total,
            hit_rate_percent: (hit_rate * 100.0).round() / 100.0,
            entries,
            size_bytes,
            size_mb: (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            max_bytes: self.config.max_bytes,
            max_entries: self.config.max_entries,
            size_utilization_percent: (utilization * 100.0).round() / 100.0,
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_entries_removed: self.expired_removed.load(Ordering::Relaxed),
            cleanup_runs: self.cleanup_runs.load(Ordering::Relaxed),
            max_age_hours: self.config.max_age.as_secs_f64() / 3600.0,
        }
    }
}

/// Run age sweeps on an interval until shutdown.
pub fn spawn_sweeper(
    cache: Arc<ConversionCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = cache.sweep().await;
                    if outcome.entries_removed > 0 {
                        info!(
                            "Cache sweep removed {} entries ({} bytes)",
                            outcome.entries_removed, outcome.bytes_freed
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("Cache sweeper shutting down");
                    break;
                }
            }
        }
    })
}
