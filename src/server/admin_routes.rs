//! Cache administration and security scan endpoints.

use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::json;

use super::convert_routes::read_upload;
use super::error::ApiResult;
use super::state::{GuardedCache, GuardedValidator};

/// GET /api/cache/status
pub async fn cache_status(State(cache): State<GuardedCache>) -> Json<serde_json::Value> {
    let stats = cache.stats();
    super::metrics::CACHE_SIZE_BYTES.set(stats.size_bytes as f64);
    Json(serde_json::to_value(&stats).unwrap_or_default())
}

/// DELETE /api/cache/clear
pub async fn cache_clear(State(cache): State<GuardedCache>) -> Json<serde_json::Value> {
    let (entries_removed, freed_bytes) = cache.clear().await;
    let space_freed_mb = (freed_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
    Json(json!({
        "entries_removed": entries_removed,
        "space_freed_mb": space_freed_mb,
        "message": format!("Removed {} cache entries", entries_removed),
    }))
}

/// POST /api/security/scan
pub async fn security_scan(
    State(validator): State<GuardedValidator>,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let upload = read_upload(multipart).await?;
    let start = std::time::Instant::now();
    let report = validator.validate(&upload.file_name, &upload.bytes);
    let scan_time = start.elapsed().as_secs_f64();

    let mut body = serde_json::to_value(&report).unwrap_or_default();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("file_name".to_string(), json!(upload.file_name));
        obj.insert("scan_time".to_string(), json!(scan_time));
    }
    Ok(Json(body))
}
