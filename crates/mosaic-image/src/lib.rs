use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::ImageReader;
use mosaic_core::{CoreError, ImageDecoder, ImageDimensions};
use thiserror::Error;
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unrecognised image format")]
    UnknownFormat,
    #[error("image has zero width or height")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] image::ImageError),
}

/// Reads width and height from the image header without decoding pixels.
pub fn decode_dimensions(bytes: &[u8]) -> Result<ImageDimensions, ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(ImageError::UnknownFormat);
    }
    let (width, height) = reader.into_dimensions()?;
    ImageDimensions::new(width, height).map_err(|_| ImageError::Empty)
}

pub fn read_dimensions(path: &Path) -> Result<ImageDimensions, ImageError> {
    let bytes = fs::read(path)?;
    decode_dimensions(&bytes)
}

pub fn is_supported_image(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Counts png/jpeg files under `dir`, the same set the overlay service picks up.
pub fn count_supported_images(dir: &Path, recursive: bool) -> usize {
    let walker = if recursive {
        WalkDir::new(dir)
    } else {
        WalkDir::new(dir).max_depth(1)
    };
    walker
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_supported_image(entry.path()))
        .count()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<ImageDimensions, CoreError> {
        decode_dimensions(bytes).map_err(|e| CoreError::Decode(e.to_string()))
    }
}
