//! Test utilities for integration tests.
//!
//! This module provides a tracking mock provider and helpers to build
//! encoded tile payloads.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tile_pyramid::error::FetchError;
use tile_pyramid::geo::Pyramid;
use tile_pyramid::provider::{Dataset, RawPayload, TileProvider};

/// Edge of the tiles served by [`TrackingProvider`].
pub const TEST_TILE_SIZE: u32 = 16;

/// Decoded size of one test tile in bytes.
pub const TEST_TILE_BYTES: usize = (TEST_TILE_SIZE * TEST_TILE_SIZE * 3) as usize;

// =============================================================================
// Payloads
// =============================================================================

/// Encode a solid-colour JPEG tile.
pub fn jpeg_tile(size: u32, colour: [u8; 3]) -> Bytes {
    let image = RgbImage::from_pixel(size, size, Rgb(colour));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&image)
        .expect("Failed to encode JPEG");
    Bytes::from(out)
}

/// Check that data starts with a JPEG SOI marker.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

// =============================================================================
// Mock Provider with Request Tracking
// =============================================================================

/// A mock provider that counts fetches and can be told to fail or stall.
pub struct TrackingProvider {
    pyramid: Pyramid,
    dataset: Dataset,
    delay: Duration,
    request_count: AtomicUsize,
    requests: Mutex<Vec<(u32, u32, u32)>>,
    failing: Mutex<HashSet<(u32, u32, u32)>>,
    offline: Mutex<bool>,
}

impl TrackingProvider {
    pub fn new() -> Self {
        Self {
            pyramid: Pyramid::web_mercator(TEST_TILE_SIZE, 18).expect("valid pyramid"),
            dataset: Dataset::new(1, 1, 1),
            delay: Duration::ZERO,
            request_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            offline: Mutex::new(false),
        }
    }

    /// Delay every fetch, so that concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.dataset = dataset;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Make every fetch of this tile fail with HTTP 404.
    pub fn fail_tile(&self, level: u32, row: u32, column: u32) {
        self.failing.lock().unwrap().insert((level, row, column));
    }

    /// Make every fetch fail with a network error, as if disconnected.
    pub fn go_offline(&self) {
        *self.offline.lock().unwrap() = true;
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(u32, u32, u32)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TileProvider for TrackingProvider {
    fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    fn dataset(&self) -> Dataset {
        self.dataset
    }

    async fn get_tile(&self, level: u32, row: u32, column: u32) -> Result<RawPayload, FetchError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((level, row, column));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if *self.offline.lock().unwrap() {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        if self.failing.lock().unwrap().contains(&(level, row, column)) {
            return Err(FetchError::Http { status: 404 });
        }

        // Colour encodes the position so tiles are distinguishable
        Ok(jpeg_tile(
            TEST_TILE_SIZE,
            [(level * 10) as u8, (row % 256) as u8, (column % 256) as u8],
        ))
    }
}
