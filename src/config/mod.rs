mod file_config;

pub use file_config::{CacheConfigFile, FileConfig, ProcessingConfig, SecurityConfig};

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::server::RequestsLoggingLevel;
use crate::validation::DEFAULT_ALLOWED_MIME_TYPES;

/// CLI arguments that participate in config resolution. TOML values
/// override CLI values where present.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::default(),
            frontend_dir_path: None,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Disk,
}

#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub max_file_size_mb: u64,
    pub allowed_mime_types: HashSet<String>,
    pub enable_content_scan: bool,
    pub rate_limit_requests_per_minute: u32,
    pub rate_limit_burst_size: u32,
}

impl SecuritySettings {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: 10,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            enable_content_scan: true,
            rate_limit_requests_per_minute: 60,
            rate_limit_burst_size: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub dir: PathBuf,
    pub max_size_mb: u64,
    pub max_entries: usize,
    pub max_age_hours: u64,
    pub cleanup_interval_minutes: u64,
}

impl CacheSettings {
    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Disk,
            dir: PathBuf::from("cache"),
            max_size_mb: 100,
            max_entries: 1000,
            max_age_hours: 24,
            cleanup_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub max_concurrent_files: usize,
    pub max_queue_size: usize,
    pub max_memory_usage_mb: u64,
    pub large_file_threshold_mb: u64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_concurrent_files: 3,
            max_queue_size: 100,
            max_memory_usage_mb: 500,
            large_file_threshold_mb: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub security: SecuritySettings,
    pub cache: CacheSettings,
    pub processing: ProcessingSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and an optional TOML
    /// file. TOML values override CLI values.
    pub fn resolve(cli: &CliConfig, file: Option<FileConfig>) -> Result<Self> {
        let file = file.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());
        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let security_file = file.security.unwrap_or_default();
        let security_defaults = SecuritySettings::default();
        let security = SecuritySettings {
            max_file_size_mb: security_file
                .max_file_size_mb
                .unwrap_or(security_defaults.max_file_size_mb),
            allowed_mime_types: security_file
                .allowed_mime_types
                .map(|types| types.into_iter().collect())
                .unwrap_or(security_defaults.allowed_mime_types),
            enable_content_scan: security_file
                .enable_content_scan
                .unwrap_or(security_defaults.enable_content_scan),
            rate_limit_requests_per_minute: security_file
                .rate_limit_requests_per_minute
                .unwrap_or(security_defaults.rate_limit_requests_per_minute),
            rate_limit_burst_size: security_file
                .rate_limit_burst_size
                .unwrap_or(security_defaults.rate_limit_burst_size),
        };
        if security.max_file_size_mb == 0 {
            bail!("security.max_file_size_mb must be positive");
        }

        let cache_file = file.cache.unwrap_or_default();
        let cache_defaults = CacheSettings::default();
        let backend = match cache_file.backend.as_deref() {
            None | Some("disk") => CacheBackendKind::Disk,
            Some("memory") => CacheBackendKind::Memory,
            Some("redis") => {
                // No redis client is wired up; the disk backend offers
                // the same persistence semantics.
                tracing::warn!("cache.backend = \"redis\" is not available, using disk");
                CacheBackendKind::Disk
            }
            Some(other) => bail!("Unknown cache backend: {}", other),
        };
        let cache = CacheSettings {
            backend,
            dir: cache_file
                .dir
                .map(PathBuf::from)
                .or_else(|| cli.cache_dir.clone())
                .unwrap_or(cache_defaults.dir),
            max_size_mb: cache_file.max_size_mb.unwrap_or(cache_defaults.max_size_mb),
            max_entries: cache_file.max_entries.unwrap_or(cache_defaults.max_entries),
            max_age_hours: cache_file
                .max_age_hours
                .unwrap_or(cache_defaults.max_age_hours),
            cleanup_interval_minutes: cache_file
                .cleanup_interval_minutes
                .unwrap_or(cache_defaults.cleanup_interval_minutes),
        };
        if cache.max_entries == 0 || cache.cleanup_interval_minutes == 0 {
            bail!("cache.max_entries and cache.cleanup_interval_minutes must be positive");
        }

        let processing_file = file.processing.unwrap_or_default();
        let processing_defaults = ProcessingSettings::default();
        let processing = ProcessingSettings {
            max_concurrent_files: processing_file
                .max_concurrent_files
                .unwrap_or(processing_defaults.max_concurrent_files),
            max_queue_size: processing_file
                .max_queue_size
                .unwrap_or(processing_defaults.max_queue_size),
            max_memory_usage_mb: processing_file
                .max_memory_usage_mb
                .unwrap_or(processing_defaults.max_memory_usage_mb),
            large_file_threshold_mb: processing_file
                .large_file_threshold_mb
                .unwrap_or(processing_defaults.large_file_threshold_mb),
        };
        if processing.max_concurrent_files == 0 || processing.max_queue_size == 0 {
            bail!("processing.max_concurrent_files and processing.max_queue_size must be positive");
        }

        Ok(Self {
            port,
            metrics_port,
            logging_level,
            frontend_dir_path,
            security,
            cache,
            processing,
        })
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    use clap::ValueEnum;
    RequestsLoggingLevel::from_str(s, true).ok()
}
