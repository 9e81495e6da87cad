//! Reference-counted, byte-budgeted LRU cache.
//!
//! Entries go through the following states:
//!
//! ```text
//! Absent ──add──▶ Resident(rc) ──acquire/release──▶ Resident(rc ± 1)
//!                      │
//!                      └── rc == 0 and recycle() over budget ──▶ Absent (free)
//! ```
//!
//! # Soft budget
//!
//! Insertion never evicts. The resident size may exceed the constraint until
//! the next [`RefCountedLru::recycle`] pass, and even after it when every
//! remaining entry is still referenced. This lets a caller acquire and release
//! a whole batch of tiles before a single eviction pass runs, so a tile that is
//! released and re-acquired in the same batch is never reloaded.
//!
//! The cache itself is not synchronized; share it behind a mutex.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, warn};

use crate::error::CacheError;

/// A resource that can live in a [`RefCountedLru`].
pub trait CacheItem: Send + Sync {
    /// Key identifying the resource.
    type Key: Hash + Eq + Clone + fmt::Display + Send + Sync;

    /// Key of this resource.
    fn key(&self) -> Self::Key;

    /// Resident size in bytes, charged against the cache constraint.
    fn size_bytes(&self) -> usize;

    /// Release side resources when the entry leaves the cache.
    fn free(&self) {}
}

struct Entry<V> {
    item: Arc<V>,
    size: usize,
    refcount: usize,
}

/// LRU cache whose entries carry a reference count.
///
/// Entries with a non-zero reference count are never evicted.
pub struct RefCountedLru<V: CacheItem> {
    /// Entries, most recently used first
    entries: LruCache<V::Key, Entry<V>>,

    /// Byte budget enforced by `recycle`
    constraint: usize,

    /// Sum of resident entry sizes
    total_size: usize,
}

impl<V: CacheItem> RefCountedLru<V> {
    /// Create an empty cache with the given byte budget.
    pub fn new(constraint: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            constraint,
            total_size: 0,
        }
    }

    /// Insert a new entry.
    ///
    /// The entry starts with a reference count of 1 if `acquire` is set, 0
    /// otherwise, and becomes the most recently used one.
    ///
    /// # Errors
    /// [`CacheError::DuplicateKey`] if the key is already resident; the
    /// resident entry is left untouched.
    pub fn add(&mut self, item: Arc<V>, acquire: bool) -> Result<(), CacheError> {
        let key = item.key();
        if self.entries.contains(&key) {
            return Err(CacheError::DuplicateKey(key.to_string()));
        }

        let size = item.size_bytes();
        self.total_size += size;
        self.entries.put(
            key,
            Entry {
                item,
                size,
                refcount: usize::from(acquire),
            },
        );
        Ok(())
    }

    /// Take a reference on a resident entry.
    ///
    /// Marks the entry as most recently used. Returns `None` when the key is
    /// absent; the caller is then expected to fetch the resource and `add` it.
    pub fn acquire(&mut self, key: &V::Key) -> Option<Arc<V>> {
        let entry = self.entries.get_mut(key)?;
        entry.refcount += 1;
        Some(entry.item.clone())
    }

    /// Drop a reference on a resident entry. Never evicts.
    ///
    /// # Errors
    /// [`CacheError::NotResident`] if the key is absent,
    /// [`CacheError::RefcountUnderflow`] if its count is already zero.
    pub fn release(&mut self, key: &V::Key) -> Result<(), CacheError> {
        let entry = self
            .entries
            .peek_mut(key)
            .ok_or_else(|| CacheError::NotResident(key.to_string()))?;

        if entry.refcount == 0 {
            return Err(CacheError::RefcountUnderflow(key.to_string()));
        }
        entry.refcount -= 1;
        Ok(())
    }

    /// Evict unreferenced entries, least recently used first, until the
    /// resident size fits the constraint.
    ///
    /// Stops early, with a warning, when only referenced entries remain.
    /// Returns the number of evicted entries.
    pub fn recycle(&mut self) -> usize {
        let mut evicted = 0;

        while self.total_size > self.constraint {
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(_, entry)| entry.refcount == 0)
                .map(|(key, _)| key.clone());

            let Some(key) = victim else {
                warn!(
                    resident = self.total_size,
                    constraint = self.constraint,
                    entries = self.entries.len(),
                    "Cache over budget but every entry is in use"
                );
                break;
            };

            if let Some(entry) = self.entries.pop(&key) {
                debug!(key = %key, size = entry.size, "Evicting cache entry");
                entry.item.free();
                self.total_size -= entry.size;
                evicted += 1;
            }
        }

        evicted
    }

    /// Evict every entry regardless of its reference count.
    pub fn reset(&mut self) {
        while let Some((_, entry)) = self.entries.pop_lru() {
            entry.item.free();
        }
        self.total_size = 0;
    }

    /// Reference count of a resident entry.
    pub fn refcount(&self, key: &V::Key) -> Option<usize> {
        self.entries.peek(key).map(|entry| entry.refcount)
    }

    /// Check residency without touching recency.
    pub fn contains(&self, key: &V::Key) -> bool {
        self.entries.contains(key)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of resident entry sizes in bytes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Byte budget.
    pub fn constraint(&self) -> usize {
        self.constraint
    }

    /// Change the byte budget; takes effect on the next `recycle`.
    pub fn set_constraint(&mut self, constraint: usize) {
        self.constraint = constraint;
    }
}

impl<V: CacheItem> fmt::Debug for RefCountedLru<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountedLru")
            .field("entries", &self.entries.len())
            .field("total_size", &self.total_size)
            .field("constraint", &self.constraint)
            .finish()
    }
}
