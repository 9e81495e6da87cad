//! Generic caching primitives.
//!
//! - [`RefCountedLru`]: LRU cache of sized resources where referenced entries
//!   are pinned, and eviction runs in explicit [`RefCountedLru::recycle`] passes.
//! - [`CacheItem`]: what a resource must expose to live in the cache.

mod refcounted;

pub use refcounted::{CacheItem, RefCountedLru};
