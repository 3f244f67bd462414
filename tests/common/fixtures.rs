//! Test image generation.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// A deterministic RGB gradient PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 2 % 256) as u8, (y * 2 % 256) as u8, 60])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// Valid PNG signature, truncated body: passes magic-byte checks but
/// fails to decode.
pub fn corrupt_png() -> Vec<u8> {
    let mut bytes = png_bytes(64, 64);
    bytes.truncate(bytes.len() / 3);
    bytes
}

/// A PNG padded with trailing random-ish noise until it exceeds
/// `target_bytes`. The decoder ignores data after IEND, so the image
/// stays decodable while tripping size limits.
pub fn oversized_png(target_bytes: usize) -> Vec<u8> {
    let mut bytes = png_bytes(32, 32);
    let mut filler = 0u8;
    while bytes.len() <= target_bytes {
        bytes.push(filler);
        filler = filler.wrapping_add(37);
    }
    bytes
}

pub fn not_an_image() -> Vec<u8> {
    b"this is plain text pretending to be an image".to_vec()
}
