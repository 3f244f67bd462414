use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// TOML configuration file. All keys optional; anything omitted falls
/// back to the CLI value or the documented default.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,

    pub security: Option<SecurityConfig>,
    pub cache: Option<CacheConfigFile>,
    pub processing: Option<ProcessingConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_file_size_mb: Option<u64>,
    pub allowed_mime_types: Option<Vec<String>>,
    pub enable_content_scan: Option<bool>,
    pub rate_limit_requests_per_minute: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CacheConfigFile {
    /// "memory" | "disk" | "redis"
    pub backend: Option<String>,
    pub dir: Option<String>,
    pub max_size_mb: Option<u64>,
    pub max_entries: Option<usize>,
    pub max_age_hours: Option<u64>,
    pub cleanup_interval_minutes: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub max_concurrent_files: Option<usize>,
    pub max_queue_size: Option<usize>,
    pub max_memory_usage_mb: Option<u64>,
    pub large_file_threshold_mb: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
