//! Security validation gate.
//!
//! Every file passes this admission check before it can be scheduled.
//! Checks run in order and short-circuit on the first failure: size,
//! MIME allow-list, magic-byte signature, then an optional deep scan
//! (suspicious-content patterns plus a decode attempt).

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::codec::ImageCodec;
use crate::error::{ConvertError, ErrorKind};

/// Byte patterns that have no business inside an image file.
const SUSPICIOUS_PATTERNS: &[&[u8]] = &[
    b"<script",
    b"javascript:",
    b"vbscript:",
    b"onload=",
    b"onerror=",
    b"<?php",
    b"eval(",
    b"shell_exec(",
];

/// Markers of embedded executables or archives, scanned across the
/// whole buffer. All are >= 4 bytes; shorter signatures would match
/// compressed pixel data by chance.
const EXECUTABLE_PATTERNS: &[(&[u8], &str)] = &[
    (b"\x7fELF", "ELF executable header"),
    (b"\xca\xfe\xba\xbe", "Java class file header"),
    (b"PK\x03\x04", "embedded ZIP archive"),
];

/// The 2-byte DOS header is only meaningful near the start of the
/// file; anywhere else it is noise.
const DOS_HEADER: &[u8] = b"MZ";
const DOS_HEADER_WINDOW: usize = 1024;

pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
    "image/x-icon",
    "image/vnd.microsoft.icon",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
}

/// Outcome of the admission check for one file.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub safe: bool,
    pub threat_level: ThreatLevel,
    pub warnings: Vec<String>,
    pub detected_mime: String,
    pub detected_format: String,
    pub file_size_check: bool,
    pub mime_type_check: bool,
    pub header_check: bool,
    pub content_check: bool,
}

impl ValidationReport {
    fn passing(detected_mime: String, detected_format: String) -> Self {
        Self {
            safe: true,
            threat_level: ThreatLevel::None,
            warnings: Vec::new(),
            detected_mime,
            detected_format,
            file_size_check: true,
            mime_type_check: true,
            header_check: true,
            content_check: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_file_size_bytes: u64,
    pub allowed_mime_types: HashSet<String>,
    pub deep_scan_enabled: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            deep_scan_enabled: true,
        }
    }
}

pub struct SecurityValidator {
    config: ValidatorConfig,
    codec: Arc<dyn ImageCodec>,
}

impl SecurityValidator {
    pub fn new(config: ValidatorConfig, codec: Arc<dyn ImageCodec>) -> Self {
        Self { config, codec }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.config.max_file_size_bytes
    }

    /// Run the admission checks for a single file.
    pub fn validate(&self, file_name: &str, bytes: &[u8]) -> ValidationReport {
        let detected = infer::get(bytes);
        let detected_mime = detected
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let detected_format = detected
            .map(|t| t.extension().to_ascii_uppercase())
            .unwrap_or_else(|| "unknown".to_string());

        let mut report = ValidationReport::passing(detected_mime.clone(), detected_format);

        // 1. Size limit.
        if bytes.len() as u64 > self.config.max_file_size_bytes {
            report.safe = false;
            report.threat_level = ThreatLevel::High;
            report.file_size_check = false;
            report.warnings.push(format!(
                "File size {} exceeds limit of {} bytes",
                bytes.len(),
                self.config.max_file_size_bytes
            ));
            return report;
        }

        // 2. MIME allow-list.
        if !self.config.allowed_mime_types.contains(&detected_mime) {
            report.safe = false;
            report.threat_level = ThreatLevel::High;
            report.mime_type_check = false;
            report
                .warnings
                .push(format!("MIME type not allowed: {}", detected_mime));
            return report;
        }

        // 3. Magic bytes must agree with the declared extension.
        if let Some(declared) = declared_mime(file_name) {
            if !mime_matches(declared, &detected_mime) {
                report.safe = false;
                report.threat_level = ThreatLevel::High;
                report.header_check = false;
                report.warnings.push(format!(
                    "File header ({}) does not match declared type ({})",
                    detected_mime, declared
                ));
                return report;
            }
        }

        // 4. Optional deep scan.
        if self.config.deep_scan_enabled {
            self.deep_scan(bytes, &mut report);
        }

        report
    }

    fn deep_scan(&self, bytes: &[u8], report: &mut ValidationReport) {
        fn flag_embedded(report: &mut ValidationReport, description: &str) {
            report.safe = false;
            report.threat_level = ThreatLevel::High;
            report.content_check = false;
            report
                .warnings
                .push(format!("Embedded content detected: {}", description));
        }

        for (pattern, description) in EXECUTABLE_PATTERNS {
            if find_pattern(bytes, pattern) {
                flag_embedded(report, description);
                return;
            }
        }
        // Offset zero is the image's own signature, already checked.
        let window = &bytes[1.min(bytes.len())..bytes.len().min(DOS_HEADER_WINDOW)];
        if find_pattern(window, DOS_HEADER) {
            flag_embedded(report, "DOS/Windows executable header");
            return;
        }

        for pattern in SUSPICIOUS_PATTERNS {
            if find_pattern(bytes, pattern) {
                report.safe = false;
                report.threat_level = ThreatLevel::Medium;
                report.content_check = false;
                report.warnings.push(format!(
                    "Suspicious pattern detected: {}",
                    String::from_utf8_lossy(pattern)
                ));
                return;
            }
        }

        // Decode attempt. A failure here is not a security finding; the
        // codec reports corrupt data properly at processing time.
        if let Err(e) = self.codec.probe(bytes) {
            debug!("Deep scan decode failed: {}", e);
            report.warnings.push(format!(
                "Image could not be fully decoded during scan: {}",
                e.message
            ));
            if report.threat_level < ThreatLevel::Low {
                report.threat_level = ThreatLevel::Low;
            }
        }
    }

    /// Map a failed report to the admission error the scheduler records.
    pub fn admission_error(report: &ValidationReport) -> Option<ConvertError> {
        if report.safe {
            return None;
        }
        let kind = if !report.file_size_check {
            ErrorKind::FileTooLarge
        } else if !report.mime_type_check {
            ErrorKind::UnsupportedFormat
        } else {
            ErrorKind::SecurityRejected
        };
        let message = report
            .warnings
            .first()
            .cloned()
            .unwrap_or_else(|| "File rejected by security validation".to_string());
        Some(ConvertError::new(kind, message))
    }
}

fn find_pattern(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn declared_mime(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "ico" => Some("image/x-icon"),
        _ => None,
    }
}

fn mime_matches(declared: &str, detected: &str) -> bool {
    if declared == detected {
        return true;
    }
    // ICO has two spellings.
    matches!(
        (declared, detected),
        ("image/x-icon", "image/vnd.microsoft.icon") | ("image/vnd.microsoft.icon", "image/x-icon")
    )
}
