//! Frame and reference image preprocessing: resize and luma histogram equalization.

use crate::frame::Frame;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use thiserror::Error;

/// Side length of the square images handed to the matcher.
pub const PREPROCESS_SIZE: u32 = 160;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("frame has zero width or height")]
    EmptyFrame,
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
}

/// An independent, immutable copy of a sampled frame, ready for verification.
///
/// Owns its pixels outright; nothing aliases the live capture buffer.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Frame-loop counter value at which this frame was sampled.
    pub sequence: u64,
    pub image: RgbImage,
}

/// Resize a captured frame to 160x160 and equalize its luma channel.
pub fn preprocess_frame(frame: &Frame, sequence: u64) -> Result<Snapshot, PreprocessError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(PreprocessError::EmptyFrame);
    }
    let expected = frame.expected_len();
    if frame.data.len() < expected {
        return Err(PreprocessError::BufferTooShort {
            expected,
            actual: frame.data.len(),
        });
    }

    let rgb = RgbImage::from_raw(frame.width, frame.height, frame.data[..expected].to_vec())
        .ok_or(PreprocessError::BufferTooShort {
            expected,
            actual: frame.data.len(),
        })?;

    let mut image = image::imageops::resize(&rgb, PREPROCESS_SIZE, PREPROCESS_SIZE, FilterType::Triangle);
    equalize_luma(&mut image);

    Ok(Snapshot { sequence, image })
}

/// Prepare a decoded reference image: convert to RGB and resize to 160x160.
pub fn preprocess_reference(image: &DynamicImage) -> RgbImage {
    image::imageops::resize(
        &image.to_rgb8(),
        PREPROCESS_SIZE,
        PREPROCESS_SIZE,
        FilterType::Triangle,
    )
}

/// Histogram-equalize the Y channel of an RGB image in YUV space, in place.
///
/// A uniform image (single occupied bin) is left untouched.
pub fn equalize_luma(image: &mut RgbImage) {
    let pixels = image.width() as usize * image.height() as usize;
    if pixels == 0 {
        return;
    }

    let mut yuv: Vec<[f32; 3]> = image.pixels().map(|p| rgb_to_yuv(p.0)).collect();

    let mut hist = [0u32; 256];
    for px in &yuv {
        hist[luma_bin(px[0])] += 1;
    }

    let mut cdf = [0u32; 256];
    cdf[0] = hist[0];
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i];
    }
    let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
    let denom = pixels as u32 - cdf_min;
    if denom == 0 {
        return;
    }

    let mut lut = [0f32; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let scaled = cdf[i].saturating_sub(cdf_min) as f32 / denom as f32 * 255.0;
        *slot = scaled.round().clamp(0.0, 255.0);
    }

    for px in yuv.iter_mut() {
        px[0] = lut[luma_bin(px[0])];
    }

    for (dst, px) in image.pixels_mut().zip(yuv.iter()) {
        dst.0 = yuv_to_rgb(*px);
    }
}

fn luma_bin(y: f32) -> usize {
    y.round().clamp(0.0, 255.0) as usize
}

// BT.601 analog YUV, chroma offset by 128.
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [f32; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 0.492 * (b - y) + 128.0;
    let v = 0.877 * (r - y) + 128.0;
    [y, u, v]
}

fn yuv_to_rgb([y, u, v]: [f32; 3]) -> [u8; 3] {
    let u = u - 128.0;
    let v = v - 128.0;
    let r = y + 1.140 * v;
    let g = y - 0.395 * u - 0.581 * v;
    let b = y + 2.032 * u;
    [clamp(r), clamp(g), clamp(b)]
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
