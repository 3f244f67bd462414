//! Processing options and cache fingerprints.
//!
//! Options are normalized before hashing so that semantically equal
//! configurations (e.g. `resize_width: 0` vs. the field omitted) map to
//! the same fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConvertError;

pub const DEFAULT_QUALITY: u8 = 85;

/// Output formats the codec can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
    Tiff,
    Ico,
}

impl TargetFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFormat::Png => "PNG",
            TargetFormat::Jpeg => "JPEG",
            TargetFormat::Webp => "WEBP",
            TargetFormat::Gif => "GIF",
            TargetFormat::Bmp => "BMP",
            TargetFormat::Tiff => "TIFF",
            TargetFormat::Ico => "ICO",
        }
    }

    /// Case-insensitive parse; accepts "JPG" as an alias for JPEG.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PNG" => Some(TargetFormat::Png),
            "JPEG" | "JPG" => Some(TargetFormat::Jpeg),
            "WEBP" => Some(TargetFormat::Webp),
            "GIF" => Some(TargetFormat::Gif),
            "BMP" => Some(TargetFormat::Bmp),
            "TIFF" => Some(TargetFormat::Tiff),
            "ICO" => Some(TargetFormat::Ico),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            TargetFormat::Png => "image/png",
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Webp => "image/webp",
            TargetFormat::Gif => "image/gif",
            TargetFormat::Bmp => "image/bmp",
            TargetFormat::Tiff => "image/tiff",
            TargetFormat::Ico => "image/x-icon",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Png => "png",
            TargetFormat::Jpeg => "jpeg",
            TargetFormat::Webp => "webp",
            TargetFormat::Gif => "gif",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Tiff => "tiff",
            TargetFormat::Ico => "ico",
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transform configuration shared by all files of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub resize_width: Option<u32>,
    pub resize_height: Option<u32>,
    pub maintain_aspect_ratio: bool,
    pub quality: u8,
    pub target_format: Option<TargetFormat>,
    pub rotation_angle: u16,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            resize_width: None,
            resize_height: None,
            maintain_aspect_ratio: true,
            quality: DEFAULT_QUALITY,
            target_format: None,
            rotation_angle: 0,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

impl ProcessingOptions {
    /// Parse options from a client-supplied JSON object.
    ///
    /// Unknown keys are ignored (with a warning collected for the
    /// caller); recognized keys with invalid values are an error.
    pub fn from_json(
        value: &serde_json::Value,
    ) -> Result<(Self, Vec<String>), ConvertError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ConvertError::input_invalid("Options must be a JSON object"))?;

        const KNOWN_KEYS: &[&str] = &[
            "resize_width",
            "resize_height",
            "maintain_aspect_ratio",
            "quality",
            "target_format",
            "rotation_angle",
            "flip_horizontal",
            "flip_vertical",
        ];

        let mut warnings = Vec::new();
        for key in obj.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                warnings.push(format!("Unknown option ignored: {}", key));
            }
        }

        let get_u32 = |key: &str| -> Result<Option<u32>, ConvertError> {
            match obj.get(key) {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(v) => v
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .map(Some)
                    .ok_or_else(|| {
                        ConvertError::input_invalid(format!("{} must be a non-negative integer", key))
                    }),
            }
        };
        let get_bool = |key: &str, default: bool| -> Result<bool, ConvertError> {
            match obj.get(key) {
                None | Some(serde_json::Value::Null) => Ok(default),
                Some(v) => v
                    .as_bool()
                    .ok_or_else(|| ConvertError::input_invalid(format!("{} must be a boolean", key))),
            }
        };

        let quality = match obj.get("quality") {
            None | Some(serde_json::Value::Null) => DEFAULT_QUALITY,
            Some(v) => v
                .as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| ConvertError::input_invalid("quality must be an integer"))?,
        };

        let target_format = match obj.get("target_format") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => {
                let s = v
                    .as_str()
                    .ok_or_else(|| ConvertError::input_invalid("target_format must be a string"))?;
                Some(TargetFormat::parse(s).ok_or_else(|| {
                    ConvertError::unsupported_format(format!("Unsupported target format: {}", s))
                })?)
            }
        };

        let rotation_angle = match obj.get("rotation_angle") {
            None | Some(serde_json::Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| ConvertError::input_invalid("rotation_angle must be an integer"))?,
        };

        let options = Self {
            resize_width: get_u32("resize_width")?,
            resize_height: get_u32("resize_height")?,
            maintain_aspect_ratio: get_bool("maintain_aspect_ratio", true)?,
            quality,
            target_format,
            rotation_angle,
            flip_horizontal: get_bool("flip_horizontal", false)?,
            flip_vertical: get_bool("flip_vertical", false)?,
        };
        options.validate()?;
        Ok((options.normalized(), warnings))
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConvertError::input_invalid(
                "Quality must be between 1 and 100",
            ));
        }
        if ![0, 90, 180, 270].contains(&self.rotation_angle) {
            return Err(ConvertError::input_invalid(
                "Rotation angle must be 0, 90, 180, or 270 degrees",
            ));
        }
        Ok(())
    }

    /// Collapse default-valued fields so equivalent configurations
    /// serialize identically. A zero resize dimension means "unset".
    pub fn normalized(&self) -> Self {
        let mut n = self.clone();
        if n.resize_width == Some(0) {
            n.resize_width = None;
        }
        if n.resize_height == Some(0) {
            n.resize_height = None;
        }
        if n.rotation_angle % 360 == 0 {
            n.rotation_angle = 0;
        }
        n
    }

    /// True when the options request no transform at all.
    pub fn is_identity(&self) -> bool {
        let n = self.normalized();
        n.resize_width.is_none()
            && n.resize_height.is_none()
            && n.target_format.is_none()
            && n.rotation_angle == 0
            && !n.flip_horizontal
            && !n.flip_vertical
    }

    /// Canonical serialization used for fingerprinting: fixed key order,
    /// default-valued fields omitted.
    pub fn canonical_string(&self) -> String {
        let n = self.normalized();
        let mut parts: Vec<String> = Vec::new();
        if let Some(w) = n.resize_width {
            parts.push(format!("w={}", w));
        }
        if let Some(h) = n.resize_height {
            parts.push(format!("h={}", h));
        }
        if !n.maintain_aspect_ratio {
            parts.push("aspect=0".to_string());
        }
        if n.quality != DEFAULT_QUALITY {
            parts.push(format!("q={}", n.quality));
        }
        if let Some(fmt) = n.target_format {
            parts.push(format!("fmt={}", fmt.as_str()));
        }
        if n.rotation_angle != 0 {
            parts.push(format!("rot={}", n.rotation_angle));
        }
        if n.flip_horizontal {
            parts.push("fliph=1".to_string());
        }
        if n.flip_vertical {
            parts.push("flipv=1".to_string());
        }
        parts.join("&")
    }
}

/// Cache key over file content and normalized options.
///
/// Two inputs with identical bytes and equivalent options always hash
/// to the same key; the SHA-256 output keeps collisions negligible.
pub fn fingerprint(file_bytes: &[u8], options: &ProcessingOptions) -> String {
    let content_hash = Sha256::digest(file_bytes);
    let mut hasher = Sha256::new();
    hasher.update(content_hash);
    hasher.update(b":");
    hasher.update(options.canonical_string().as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
