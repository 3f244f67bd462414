//! HTTP client for end-to-end tests.
//!
//! Wraps reqwest with methods for every endpoint. When routes or
//! request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");
        Self { client, base_url }
    }

    fn file_part(name: &str, bytes: Vec<u8>) -> Part {
        Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")
            .expect("valid mime")
    }

    // ========================================================================
    // Single conversion endpoints
    // ========================================================================

    /// POST /api/convert/to-base64
    pub async fn convert_to_base64(&self, file_name: &str, bytes: Vec<u8>) -> Response {
        let form = Form::new().part("file", Self::file_part(file_name, bytes));
        self.client
            .post(format!("{}/api/convert/to-base64", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("request failed")
    }

    /// POST /api/convert/to-base64-advanced
    pub async fn convert_advanced(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        options: &Value,
    ) -> Response {
        let form = Form::new()
            .part("file", Self::file_part(file_name, bytes))
            .text("options", options.to_string());
        self.client
            .post(format!("{}/api/convert/to-base64-advanced", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("request failed")
    }

    /// POST /api/convert/from-base64
    pub async fn from_base64(&self, base64: &str, format: &str) -> Response {
        self.client
            .post(format!("{}/api/convert/from-base64", self.base_url))
            .json(&json!({ "base64": base64, "format": format }))
            .send()
            .await
            .expect("request failed")
    }

    /// POST /api/validate-base64
    pub async fn validate_base64(&self, base64: &str) -> Response {
        self.client
            .post(format!("{}/api/validate-base64", self.base_url))
            .json(&json!({ "base64": base64 }))
            .send()
            .await
            .expect("request failed")
    }

    // ========================================================================
    // Batch endpoints
    // ========================================================================

    /// POST /api/convert/batch-start
    pub async fn batch_start(&self, files: Vec<(&str, Vec<u8>)>, options: &Value) -> Response {
        let mut form = Form::new().text("options", options.to_string());
        for (name, bytes) in files {
            form = form.part("files", Self::file_part(name, bytes));
        }
        self.client
            .post(format!("{}/api/convert/batch-start", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("request failed")
    }

    /// GET /api/convert/batch-progress/{queue_id}
    pub async fn batch_progress(&self, queue_id: &str) -> Response {
        self.client
            .get(format!(
                "{}/api/convert/batch-progress/{}",
                self.base_url, queue_id
            ))
            .send()
            .await
            .expect("request failed")
    }

    /// DELETE /api/convert/batch-cancel/{queue_id}
    pub async fn batch_cancel(&self, queue_id: &str) -> Response {
        self.client
            .delete(format!(
                "{}/api/convert/batch-cancel/{}",
                self.base_url, queue_id
            ))
            .send()
            .await
            .expect("request failed")
    }

    /// GET /api/convert/batch-status
    pub async fn batch_status(&self) -> Response {
        self.client
            .get(format!("{}/api/convert/batch-status", self.base_url))
            .send()
            .await
            .expect("request failed")
    }

    /// POST /api/convert/batch-cleanup
    pub async fn batch_cleanup(&self, max_age_hours: Option<f64>) -> Response {
        let body = match max_age_hours {
            Some(hours) => json!({ "max_age_hours": hours }),
            None => json!({}),
        };
        self.client
            .post(format!("{}/api/convert/batch-cleanup", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    /// Poll the progress endpoint until the job leaves processing
    /// states, returning the final snapshot.
    pub async fn wait_for_terminal(&self, queue_id: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            if start.elapsed() > Duration::from_millis(BATCH_TERMINAL_TIMEOUT_MS) {
                panic!("batch {} never reached a terminal state", queue_id);
            }
            let response = self.batch_progress(queue_id).await;
            assert!(response.status().is_success());
            let body: Value = response.json().await.expect("json body");
            let status = body["status"].as_str().unwrap_or_default();
            if status != "pending" && status != "processing" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(BATCH_POLL_INTERVAL_MS)).await;
        }
    }

    // ========================================================================
    // Cache and security endpoints
    // ========================================================================

    /// GET /api/cache/status
    pub async fn cache_status(&self) -> Value {
        self.client
            .get(format!("{}/api/cache/status", self.base_url))
            .send()
            .await
            .expect("request failed")
            .json()
            .await
            .expect("json body")
    }

    /// DELETE /api/cache/clear
    pub async fn cache_clear(&self) -> Value {
        self.client
            .delete(format!("{}/api/cache/clear", self.base_url))
            .send()
            .await
            .expect("request failed")
            .json()
            .await
            .expect("json body")
    }

    /// POST /api/security/scan
    pub async fn security_scan(&self, file_name: &str, bytes: Vec<u8>) -> Response {
        let form = Form::new().part("file", Self::file_part(file_name, bytes));
        self.client
            .post(format!("{}/api/security/scan", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("request failed")
    }
}
