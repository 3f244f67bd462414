//! Byte-oriented image codec adapter.
//!
//! The rest of the system treats conversion as a pure function
//! `(input_bytes, options) -> (output_bytes, metadata)`. Decoded pixel
//! data never crosses a component boundary; it lives only inside a
//! single `process` call.

mod options;

pub use options::{fingerprint, ProcessingOptions, TargetFormat, DEFAULT_QUALITY};

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, ImageFormat};

use crate::error::{ConvertError, Result};

/// Basic properties of an encoded image, without transforming it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImageInfo {
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Pixel layout, e.g. "RGB", "RGBA", "L".
    pub mode: String,
}

/// Output of a codec call: produced bytes plus the metadata the batch
/// pipeline records on the task outcome.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub original_format: String,
    pub original_width: u32,
    pub original_height: u32,
}

impl ProcessedImage {
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// The conversion function the worker pool and single-file endpoints
/// call. Implementations must be pure with respect to their inputs.
pub trait ImageCodec: Send + Sync {
    /// Decode just enough to report format, dimensions and pixel mode.
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo>;

    /// Apply the full option pipeline and re-encode.
    fn process(&self, bytes: &[u8], options: &ProcessingOptions) -> Result<ProcessedImage>;

    /// Re-encode an image into the given format without other transforms.
    fn transcode(&self, bytes: &[u8], format: TargetFormat) -> Result<Vec<u8>>;
}

/// Codec backed by the `image` crate.
#[derive(Debug, Default)]
pub struct ImageRsCodec;

impl ImageRsCodec {
    fn decode(bytes: &[u8]) -> Result<(DynamicImage, ImageFormat)> {
        let format = image::guess_format(bytes)
            .map_err(|e| ConvertError::codec_failed(format!("Unrecognized image data: {}", e)))?;
        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| ConvertError::codec_failed(format!("Failed to decode image: {}", e)))?;
        Ok((img, format))
    }

    fn encode(img: &DynamicImage, format: TargetFormat, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match format {
            TargetFormat::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = img.to_rgb8();
                let mut cursor = Cursor::new(&mut buf);
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut cursor,
                    quality,
                );
                rgb.write_with_encoder(encoder).map_err(|e| {
                    ConvertError::codec_failed(format!("JPEG encoding failed: {}", e))
                })?;
            }
            other => {
                let target = to_image_format(other);
                img.write_to(&mut Cursor::new(&mut buf), target).map_err(|e| {
                    ConvertError::codec_failed(format!("{} encoding failed: {}", other, e))
                })?;
            }
        }
        Ok(buf)
    }
}

impl ImageCodec for ImageRsCodec {
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo> {
        let (img, format) = Self::decode(bytes)?;
        Ok(ImageInfo {
            format: format_name(format).to_string(),
            width: img.width(),
            height: img.height(),
            mode: color_mode(&img).to_string(),
        })
    }

    fn process(&self, bytes: &[u8], options: &ProcessingOptions) -> Result<ProcessedImage> {
        options.validate()?;
        let (mut img, source_format) = Self::decode(bytes)?;
        let original_format = format_name(source_format).to_string();
        let (original_width, original_height) = (img.width(), img.height());

        let options = options.normalized();

        // Identity options pass the input through untouched, so the
        // basic and advanced paths agree byte-for-byte.
        if options.is_identity() {
            return Ok(ProcessedImage {
                bytes: bytes.to_vec(),
                format: original_format.clone(),
                width: original_width,
                height: original_height,
                original_format,
                original_width,
                original_height,
            });
        }

        match options.rotation_angle {
            90 => img = img.rotate90(),
            180 => img = img.rotate180(),
            270 => img = img.rotate270(),
            _ => {}
        }
        if options.flip_horizontal {
            img = img.fliph();
        }
        if options.flip_vertical {
            img = img.flipv();
        }

        if options.resize_width.is_some() || options.resize_height.is_some() {
            let target_w = options.resize_width.unwrap_or(img.width());
            let target_h = options.resize_height.unwrap_or(img.height());
            img = if options.maintain_aspect_ratio {
                img.resize(target_w, target_h, image::imageops::FilterType::Lanczos3)
            } else {
                img.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
            };
        }

        let out_format = options
            .target_format
            .or_else(|| from_image_format(source_format))
            .unwrap_or(TargetFormat::Png);

        let (width, height) = (img.width(), img.height());
        let out_bytes = Self::encode(&img, out_format, options.quality)?;

        Ok(ProcessedImage {
            bytes: out_bytes,
            format: out_format.as_str().to_string(),
            width,
            height,
            original_format,
            original_width,
            original_height,
        })
    }

    fn transcode(&self, bytes: &[u8], format: TargetFormat) -> Result<Vec<u8>> {
        let (img, _) = Self::decode(bytes)?;
        Self::encode(&img, format, DEFAULT_QUALITY)
    }
}

fn to_image_format(format: TargetFormat) -> ImageFormat {
    match format {
        TargetFormat::Png => ImageFormat::Png,
        TargetFormat::Jpeg => ImageFormat::Jpeg,
        TargetFormat::Webp => ImageFormat::WebP,
        TargetFormat::Gif => ImageFormat::Gif,
        TargetFormat::Bmp => ImageFormat::Bmp,
        TargetFormat::Tiff => ImageFormat::Tiff,
        TargetFormat::Ico => ImageFormat::Ico,
    }
}

fn from_image_format(format: ImageFormat) -> Option<TargetFormat> {
    match format {
        ImageFormat::Png => Some(TargetFormat::Png),
        ImageFormat::Jpeg => Some(TargetFormat::Jpeg),
        ImageFormat::WebP => Some(TargetFormat::Webp),
        ImageFormat::Gif => Some(TargetFormat::Gif),
        ImageFormat::Bmp => Some(TargetFormat::Bmp),
        ImageFormat::Tiff => Some(TargetFormat::Tiff),
        ImageFormat::Ico => Some(TargetFormat::Ico),
        _ => None,
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "PNG",
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Gif => "GIF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Tiff => "TIFF",
        ImageFormat::Ico => "ICO",
        _ => "UNKNOWN",
    }
}

fn color_mode(img: &DynamicImage) -> &'static str {
    use image::ColorType;
    match img.color() {
        ColorType::L8 | ColorType::L16 => "L",
        ColorType::La8 | ColorType::La16 => "LA",
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => "RGB",
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA",
        _ => "RGB",
    }
}

/// Standard Base64 encoding of raw image bytes.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a Base64 payload, tolerating a `data:image/...;base64,` prefix
/// and surrounding whitespace.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let trimmed = data.trim();
    let payload = match trimmed.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    BASE64
        .decode(payload)
        .map_err(|e| ConvertError::input_invalid(format!("Invalid Base64 data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn probe_reports_format_and_dimensions() {
        let codec = ImageRsCodec;
        let info = codec.probe(&png_fixture(32, 16)).unwrap();
        assert_eq!(info.format, "PNG");
        assert_eq!(info.width, 32);
        assert_eq!(info.height, 16);
        assert_eq!(info.mode, "RGB");
    }

    #[test]
    fn probe_rejects_garbage() {
        let codec = ImageRsCodec;
        let err = codec.probe(b"definitely not an image").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CodecFailed);
    }

    #[test]
    fn identity_options_pass_bytes_through() {
        let codec = ImageRsCodec;
        let input = png_fixture(10, 10);
        let out = codec.process(&input, &ProcessingOptions::default()).unwrap();
        assert_eq!(out.bytes, input);
        assert_eq!(out.format, "PNG");
    }

    #[test]
    fn format_conversion_produces_target_format() {
        let codec = ImageRsCodec;
        let opts = ProcessingOptions {
            target_format: Some(TargetFormat::Jpeg),
            ..Default::default()
        };
        let out = codec.process(&png_fixture(20, 20), &opts).unwrap();
        assert_eq!(out.format, "JPEG");
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(out.original_format, "PNG");
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let codec = ImageRsCodec;
        let opts = ProcessingOptions {
            rotation_angle: 90,
            ..Default::default()
        };
        let out = codec.process(&png_fixture(40, 20), &opts).unwrap();
        assert_eq!((out.width, out.height), (20, 40));
    }

    #[test]
    fn resize_with_aspect_ratio_fits_within_bounds() {
        let codec = ImageRsCodec;
        let opts = ProcessingOptions {
            resize_width: Some(50),
            resize_height: Some(50),
            ..Default::default()
        };
        let out = codec.process(&png_fixture(100, 200), &opts).unwrap();
        // Aspect-preserving resize fits inside the box.
        assert_eq!((out.width, out.height), (25, 50));
    }

    #[test]
    fn resize_exact_ignores_aspect_ratio() {
        let codec = ImageRsCodec;
        let opts = ProcessingOptions {
            resize_width: Some(50),
            resize_height: Some(50),
            maintain_aspect_ratio: false,
            ..Default::default()
        };
        let out = codec.process(&png_fixture(100, 200), &opts).unwrap();
        assert_eq!((out.width, out.height), (50, 50));
    }

    #[test]
    fn lossless_roundtrip_preserves_pixels() {
        let codec = ImageRsCodec;
        let input = png_fixture(16, 16);
        let bmp = codec.transcode(&input, TargetFormat::Bmp).unwrap();
        let back = codec.transcode(&bmp, TargetFormat::Png).unwrap();

        let a = image::load_from_memory(&input).unwrap().to_rgb8();
        let b = image::load_from_memory(&back).unwrap().to_rgb8();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn base64_roundtrip() {
        let bytes = png_fixture(8, 8);
        let encoded = encode_base64(&bytes);
        assert_eq!(decode_base64(&encoded).unwrap(), bytes);
    }

    #[test]
    fn base64_strips_data_uri_prefix() {
        let bytes = b"hello".to_vec();
        let with_prefix = format!("data:image/png;base64,{}", encode_base64(&bytes));
        assert_eq!(decode_base64(&with_prefix).unwrap(), bytes);
    }

    #[test]
    fn base64_rejects_invalid_payload() {
        let err = decode_base64("!!not-base64!!").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InputInvalid);
    }
}
