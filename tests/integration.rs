//! Integration tests for Tile Pyramid.
//!
//! These tests verify end-to-end functionality including:
//! - Concurrent acquisition with a single provider fetch per tile
//! - Failure and timeout handling on the acquisition path
//! - Viewport tracking and cache eviction under a byte budget
//! - Offline regions with overlapping pins, persisted across reopen
//! - Region preloading and serving tiles without network

mod integration {
    pub mod test_utils;

    pub mod acquisition_tests;
    pub mod offline_tests;
    pub mod viewport_tests;
}
