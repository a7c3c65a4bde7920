//! Image loading, rotation and base64 transport encoding.
//!
//! Nothing here validates image content up front. Malformed bytes surface as a decode
//! error at the point of use (rotation, compositing), which is where the caller can
//! report it.

use crate::error::{Result, VisionChatError};
use base64::Engine;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// File extensions accepted for upload
pub const ACCEPTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// Standard base64 of raw bytes, the form the daemon expects in `images`
pub fn encode(raw_bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw_bytes)
}

/// An image handed to us by the user, kept for one interaction
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedImage {
    pub name: String,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl UploadedImage {
    /// Read format and dimensions from the header, without a full decode
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let name = name.into();
        let reader = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;

        let format = reader
            .format()
            .filter(is_accepted_format)
            .ok_or_else(|| VisionChatError::ImageError(format!("{}: unsupported image format", name)))?;
        let (width, height) = reader.into_dimensions()?;

        Ok(Self {
            name,
            bytes,
            format,
            width,
            height,
        })
    }

    /// Read an image file, rejecting extensions we do not accept
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(VisionChatError::ImageError(format!(
                "{}: expected one of {}",
                path.display(),
                ACCEPTED_EXTENSIONS.join(", ")
            )));
        }

        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self::from_bytes(name, bytes)
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn to_base64(&self) -> String {
        encode(&self.bytes)
    }
}

fn is_accepted_format(format: &ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Gif | ImageFormat::WebP
    )
}

/// Clockwise rotation in quarter turns, as the user sees it on screen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rotation(u16);

impl Rotation {
    /// Build from any multiple of 90, negative meaning counter-clockwise
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(VisionChatError::ConfigError(format!(
                "rotation must be a multiple of 90 degrees, got {}",
                degrees
            )));
        }
        Ok(Self(degrees.rem_euclid(360) as u16))
    }

    pub fn degrees(self) -> u16 {
        self.0
    }

    pub fn is_identity(self) -> bool {
        self.0 == 0
    }

    /// Compose with a further rotation
    pub fn turned(self, degrees: i32) -> Result<Self> {
        let extra = Self::from_degrees(degrees)?;
        Ok(Self((self.0 + extra.0) % 360))
    }
}

/// Rotate encoded image bytes clockwise by `degrees`.
///
/// The canvas expands to fit, so quarter turns swap width and height. The result keeps
/// the source format when it is known and encodable, and falls back to PNG otherwise.
pub fn rotate(bytes: &[u8], degrees: i32) -> Result<Vec<u8>> {
    let rotation = Rotation::from_degrees(degrees)?;
    if rotation.is_identity() {
        return Ok(bytes.to_vec());
    }

    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let source_format = reader.format();
    let decoded = reader.decode()?;

    let rotated = match rotation.degrees() {
        90 => decoded.rotate90(),
        180 => decoded.rotate180(),
        _ => decoded.rotate270(),
    };

    let target = source_format.filter(is_accepted_format).unwrap_or(ImageFormat::Png);
    match encode_as(&rotated, target) {
        Ok(out) => Ok(out),
        Err(e) if target != ImageFormat::Png => {
            debug!("Re-encoding rotated image as {:?} failed ({}), using PNG", target, e);
            encode_as(&rotated, ImageFormat::Png)
        }
        Err(e) => Err(e),
    }
}

fn encode_as(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut Cursor::new(&mut out), format)?,
        _ => image.write_to(&mut Cursor::new(&mut out), format)?,
    }
    Ok(out)
}
