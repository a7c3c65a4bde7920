//! Side-by-side compositing of two or three images.
//!
//! All inputs are scaled to the shortest input's height, keeping aspect ratio, then
//! pasted left to right with no gutter and encoded as a single JPEG.

use crate::error::{Result, VisionChatError};
use crate::imaging::codec;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

pub const JPEG_QUALITY: u8 = 95;
pub const MIN_INPUTS: usize = 2;
pub const MAX_INPUTS: usize = 3;

/// A composite built from 2 or 3 source images
#[derive(Debug, Clone)]
pub struct CompositeImage {
    jpeg: Vec<u8>,
    pixels: RgbImage,
}

impl CompositeImage {
    /// Encoded JPEG bytes
    pub fn bytes(&self) -> &[u8] {
        &self.jpeg
    }

    /// Decoded canvas, before JPEG loss
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Transport string for the chat request
    pub fn to_base64(&self) -> String {
        codec::encode(&self.jpeg)
    }
}

/// Width after scaling to `target_height`, rounded down
pub fn scaled_width(width: u32, height: u32, target_height: u32) -> u32 {
    (u64::from(width) * u64::from(target_height) / u64::from(height)) as u32
}

/// Combine encoded images horizontally in the given order.
///
/// Fails as a whole if any input cannot be decoded; there is no partial composite.
pub fn compose(images: &[&[u8]]) -> Result<CompositeImage> {
    if !(MIN_INPUTS..=MAX_INPUTS).contains(&images.len()) {
        return Err(VisionChatError::ConfigError(format!(
            "a composite needs {} to {} images, got {}",
            MIN_INPUTS,
            MAX_INPUTS,
            images.len()
        )));
    }

    let decoded = images
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            image::load_from_memory(bytes).map(|img| img.into_rgb8()).map_err(|e| {
                VisionChatError::ImageError(format!("image {} could not be decoded: {}", i + 1, e))
            })
        })
        .collect::<Result<Vec<RgbImage>>>()?;

    let target_height = decoded.iter().map(RgbImage::height).min().unwrap_or(0);
    if target_height == 0 {
        return Err(VisionChatError::ImageError("cannot composite an empty image".to_string()));
    }

    let mut resized = Vec::with_capacity(decoded.len());
    for (i, img) in decoded.iter().enumerate() {
        let new_width = scaled_width(img.width(), img.height(), target_height);
        if new_width == 0 {
            return Err(VisionChatError::ImageError(format!(
                "image {} is too narrow to scale to height {}",
                i + 1,
                target_height
            )));
        }
        resized.push(imageops::resize(img, new_width, target_height, FilterType::Lanczos3));
    }

    let total_width: u32 = resized.iter().map(RgbImage::width).sum();
    let mut canvas = RgbImage::new(total_width, target_height);

    let mut x = 0i64;
    for img in &resized {
        imageops::replace(&mut canvas, img, x, 0);
        x += i64::from(img.width());
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&canvas)?;

    debug!(
        "Composited {} images into {}x{} ({} bytes)",
        images.len(),
        total_width,
        target_height,
        jpeg.len()
    );

    Ok(CompositeImage {
        jpeg,
        pixels: canvas,
    })
}
