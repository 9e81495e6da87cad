//! Decoded tile raster.
//!
//! Network payloads (JPEG or PNG) are decoded once, when a tile enters the
//! cache, into an RGB buffer. The rest of the engine only looks at the width,
//! height and byte size of the result.

use std::io::Cursor;

use image::{ImageReader, RgbImage};

use crate::error::FetchError;

/// Decoded raster payload of a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    pixels: RgbImage,
}

impl TileImage {
    /// Wrap an already decoded buffer.
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Decode an encoded payload, guessing its format from the magic bytes.
    ///
    /// # Errors
    /// [`FetchError::MalformedPayload`] if the format is unknown or decoding fails.
    pub fn decode(payload: &[u8]) -> Result<Self, FetchError> {
        if payload.is_empty() {
            return Err(FetchError::MalformedPayload("empty payload".to_string()));
        }

        let reader = ImageReader::new(Cursor::new(payload))
            .with_guessed_format()
            .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;

        if reader.format().is_none() {
            return Err(FetchError::MalformedPayload(
                "unrecognized image format".to_string(),
            ));
        }

        let image = reader
            .decode()
            .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;

        Ok(Self {
            pixels: image.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Size of the decoded buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// Decoded pixels.
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}
