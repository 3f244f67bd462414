//! Error taxonomy shared by all core components.
//!
//! Every fallible public operation returns one of these kinds. The edge
//! layer maps kinds to HTTP status codes; the batch worker records them
//! per task without aborting the job.

use thiserror::Error;

/// Stable machine-readable error identifiers exposed by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InputInvalid,
    UnsupportedFormat,
    FileTooLarge,
    SecurityRejected,
    CodecFailed,
    CacheUnavailable,
    QueueFull,
    RateLimited,
    JobNotFound,
    JobAlreadyTerminal,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputInvalid => "INPUT_INVALID",
            ErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorKind::FileTooLarge => "FILE_TOO_LARGE",
            ErrorKind::SecurityRejected => "SECURITY_REJECTED",
            ErrorKind::CodecFailed => "CODEC_FAILED",
            ErrorKind::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorKind::QueueFull => "QUEUE_FULL",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::JobNotFound => "JOB_NOT_FOUND",
            ErrorKind::JobAlreadyTerminal => "JOB_ALREADY_TERMINAL",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type carrying a stable kind and a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ConvertError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ConvertError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputInvalid, message)
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedFormat, message)
    }

    pub fn file_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileTooLarge, message)
    }

    pub fn security_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityRejected, message)
    }

    pub fn codec_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CodecFailed, message)
    }

    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CacheUnavailable, message)
    }

    pub fn queue_full(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueueFull, message)
    }

    pub fn job_not_found(job_id: &str) -> Self {
        Self::new(ErrorKind::JobNotFound, format!("Unknown job: {}", job_id))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
