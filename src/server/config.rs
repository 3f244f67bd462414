use super::RequestsLoggingLevel;

/// Runtime settings the HTTP layer needs on every request.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub requests_logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    /// Upper bound for request bodies (multipart batches included).
    pub max_body_bytes: usize,
}
