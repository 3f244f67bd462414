//! Single-file conversion and Base64 validation endpoints.

use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::error::{ApiError, ApiResult};
use super::metrics::record_conversion;
use super::state::{GuardedCodec, GuardedScheduler, GuardedValidator};
use crate::codec::{decode_base64, encode_base64, ProcessingOptions, TargetFormat};
use crate::error::ConvertError;
use crate::validation::SecurityValidator;

/// A file plus optional options JSON pulled out of a multipart body.
pub(super) struct UploadedForm {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub options_json: Option<String>,
}

pub(super) async fn read_upload(mut multipart: Multipart) -> ApiResult<UploadedForm> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut options_json = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ConvertError::input_invalid(format!("Malformed multipart body: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ConvertError::input_invalid(format!("Failed to read file: {}", e)))?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("options") => {
                let text = field.text().await.map_err(|e| {
                    ConvertError::input_invalid(format!("Failed to read options: {}", e))
                })?;
                options_json = Some(text);
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| ConvertError::input_invalid("No file provided"))?;
    if bytes.is_empty() {
        return Err(ConvertError::input_invalid("No file provided").into());
    }
    Ok(UploadedForm {
        file_name,
        bytes,
        options_json,
    })
}

pub(super) fn parse_options(
    options_json: Option<&str>,
) -> ApiResult<(ProcessingOptions, Vec<String>)> {
    match options_json {
        None => Ok((ProcessingOptions::default(), Vec::new())),
        Some(text) if text.trim().is_empty() => Ok((ProcessingOptions::default(), Vec::new())),
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| ConvertError::input_invalid(format!("Invalid options JSON: {}", e)))?;
            Ok(ProcessingOptions::from_json(&value)?)
        }
    }
}

/// POST /api/convert/to-base64
pub async fn convert_to_base64(
    State(validator): State<GuardedValidator>,
    State(codec): State<GuardedCodec>,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let upload = read_upload(multipart).await?;

    let report = validator.validate(&upload.file_name, &upload.bytes);
    if let Some(error) = SecurityValidator::admission_error(&report) {
        record_conversion("single", false);
        return Err(error.into());
    }

    let bytes = upload.bytes;
    let probe_bytes = bytes.clone();
    let info = tokio::task::spawn_blocking(move || codec.probe(&probe_bytes))
        .await
        .map_err(|e| ConvertError::internal(format!("Codec task panicked: {}", e)))??;

    record_conversion("single", true);
    Ok(Json(json!({
        "base64": encode_base64(&bytes),
        "format": info.format,
        "size": [info.width, info.height],
        "file_size": bytes.len(),
    })))
}

/// POST /api/convert/to-base64-advanced
pub async fn convert_to_base64_advanced(
    State(validator): State<GuardedValidator>,
    State(scheduler): State<GuardedScheduler>,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let upload = read_upload(multipart).await?;
    let (options, warnings) = parse_options(upload.options_json.as_deref())?;

    let report = validator.validate(&upload.file_name, &upload.bytes);
    if let Some(error) = SecurityValidator::admission_error(&report) {
        record_conversion("single", false);
        return Err(error.into());
    }

    let result = scheduler.convert_single(upload.bytes, &options).await;
    let (artifact, cache_hit) = match result {
        Ok(output) => output,
        Err(e) => {
            record_conversion("single", false);
            return Err(e.into());
        }
    };

    record_conversion("single", true);
    // Superset of the basic response: format/size describe the
    // returned payload, with original_*/processed_* alongside.
    let mut body = json!({
        "base64": encode_base64(&artifact.bytes),
        "format": artifact.meta.format,
        "size": [artifact.meta.width, artifact.meta.height],
        "original_format": artifact.meta.original_format,
        "original_size": [artifact.meta.original_width, artifact.meta.original_height],
        "processed_format": artifact.meta.format,
        "processed_size": [artifact.meta.width, artifact.meta.height],
        "file_size": artifact.meta.size_bytes,
        "processing_options": options,
        "cache_hit": cache_hit,
    });
    if !warnings.is_empty() {
        body["warnings"] = json!(warnings);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct FromBase64Body {
    pub base64: String,
    #[serde(default)]
    pub format: Option<String>,
}

/// POST /api/convert/from-base64
///
/// Responds with the raw image bytes and an attachment disposition.
pub async fn convert_from_base64(
    State(codec): State<GuardedCodec>,
    Json(body): Json<FromBase64Body>,
) -> ApiResult<Response> {
    let format = match body.format.as_deref() {
        None => TargetFormat::Png,
        Some(name) => TargetFormat::parse(name).ok_or_else(|| {
            ConvertError::unsupported_format(format!("Unsupported target format: {}", name))
        })?,
    };

    let bytes = decode_base64(&body.base64)?;
    let produced = tokio::task::spawn_blocking(move || codec.transcode(&bytes, format))
        .await
        .map_err(|e| ConvertError::internal(format!("Codec task panicked: {}", e)))??;

    record_conversion("from_base64", true);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"converted.{}\"", format.extension()),
        )
        .body(produced.into())
        .map_err(|e| ApiError(ConvertError::internal(e.to_string())))?;
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct ValidateBase64Body {
    pub base64: String,
}

/// POST /api/validate-base64
///
/// Always responds 200; validity is reported in the body.
pub async fn validate_base64(
    State(codec): State<GuardedCodec>,
    Json(body): Json<ValidateBase64Body>,
) -> impl IntoResponse {
    let bytes = match decode_base64(&body.base64) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Json(json!({ "valid": false, "error": e.message }));
        }
    };

    let probed = tokio::task::spawn_blocking(move || codec.probe(&bytes)).await;
    match probed {
        Ok(Ok(info)) => Json(json!({
            "valid": true,
            "format": info.format,
            "size": [info.width, info.height],
            "mode": info.mode,
        })),
        Ok(Err(e)) => Json(json!({ "valid": false, "error": e.message })),
        Err(e) => Json(json!({ "valid": false, "error": e.to_string() })),
    }
}
