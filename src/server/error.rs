//! Mapping from core error kinds to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{ConvertError, ErrorKind};

/// Wrapper that renders a core error as a JSON response with a stable
/// `error_code`. The legacy `error` field mirrors `message` for
/// compatibility with older clients.
#[derive(Debug)]
pub struct ApiError(pub ConvertError);

impl From<ConvertError> for ApiError {
    fn from(error: ConvertError) -> Self {
        Self(error)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InputInvalid => StatusCode::BAD_REQUEST,
        ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::SecurityRejected => StatusCode::BAD_REQUEST,
        ErrorKind::CodecFailed => StatusCode::BAD_REQUEST,
        ErrorKind::CacheUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::QueueFull => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::JobNotFound => StatusCode::NOT_FOUND,
        ErrorKind::JobAlreadyTerminal => StatusCode::OK,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        let body = Json(json!({
            "error": self.0.message,
            "error_code": self.0.kind,
            "message": self.0.message,
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
