//! Cache storage backends.
//!
//! The cache's coalescing and eviction logic is backend-agnostic; a
//! backend only needs to persist artifacts by key. Backend errors are
//! reported upward but the cache treats them as misses, so a broken
//! disk never fails a conversion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

/// Metadata stored alongside each cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub original_format: String,
    pub original_width: u32,
    pub original_height: u32,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// A cached conversion product: the produced bytes plus metadata.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub bytes: Vec<u8>,
    pub meta: ArtifactMeta,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredArtifact>>;
    async fn put(&self, key: &str, artifact: &StoredArtifact) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Enumerate persisted entries so the cache index can be rebuilt on
    /// startup. Memory backends start empty.
    async fn load_index(&self) -> Result<Vec<(String, ArtifactMeta)>>;
}

/// Process-local backend with no persistence.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, StoredArtifact>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<StoredArtifact>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, artifact: &StoredArtifact) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), artifact.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<(String, ArtifactMeta)>> {
        Ok(Vec::new())
    }
}

/// Disk backend storing `<key>.bin` artifacts with `<key>.json` metadata
/// sidecars under a cache directory.
pub struct DiskBackend {
    dir: PathBuf,
}

impl DiskBackend {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", dir))?;
        Ok(Self { dir })
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", key))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn get(&self, key: &str) -> Result<Option<StoredArtifact>> {
        let data_path = self.data_path(key);
        let meta_path = self.meta_path(key);
        if !data_path.exists() || !meta_path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&data_path)
            .await
            .with_context(|| format!("Failed to read cache artifact: {:?}", data_path))?;
        let meta_json = tokio::fs::read_to_string(&meta_path)
            .await
            .with_context(|| format!("Failed to read cache metadata: {:?}", meta_path))?;
        let meta: ArtifactMeta = serde_json::from_str(&meta_json)
            .with_context(|| format!("Corrupt cache metadata: {:?}", meta_path))?;
        Ok(Some(StoredArtifact { bytes, meta }))
    }

    async fn put(&self, key: &str, artifact: &StoredArtifact) -> Result<()> {
        let meta_json = serde_json::to_string(&artifact.meta)?;
        tokio::fs::write(self.data_path(key), &artifact.bytes)
            .await
            .with_context(|| format!("Failed to write cache artifact: {}", key))?;
        tokio::fs::write(self.meta_path(key), meta_json)
            .await
            .with_context(|| format!("Failed to write cache metadata: {}", key))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        for path in [self.data_path(key), self.meta_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to delete: {:?}", path)),
            }
        }
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<(String, ArtifactMeta)>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list cache directory: {:?}", self.dir))?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(json) => match serde_json::from_str::<ArtifactMeta>(&json) {
                    Ok(meta) => entries.push((key, meta)),
                    Err(e) => warn!("Skipping corrupt cache metadata {:?}: {}", path, e),
                },
                Err(e) => warn!("Skipping unreadable cache metadata {:?}: {}", path, e),
            }
        }
        Ok(entries)
    }
}
