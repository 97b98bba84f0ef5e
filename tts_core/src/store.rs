//! Process-wide store of synthesized audio.
//!
//! The store stops growing once it holds `max_entries` buffers. Nothing is
//! ever evicted to make room: new entries are refused until the store is
//! cleared. Lookups do not reorder anything.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::fingerprint::CacheKey;

/// Reference bound on the number of cached buffers.
pub const DEFAULT_MAX_ENTRIES: usize = 100;
/// How many entries `stats()` lists individually.
pub const LARGEST_ENTRIES_SHOWN: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntrySummary {
    /// Truncated key, see [`CacheKey::preview`].
    pub key: String,
    pub size_bytes: usize,
    pub size_kb: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    /// Largest first, at most [`LARGEST_ENTRIES_SHOWN`] items.
    pub largest_entries: Vec<EntrySummary>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClearReport {
    pub cleared_entries: usize,
    pub freed_bytes: usize,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Arc<[u8]>>,
    // Insertion order, only walked by stats().
    order: Vec<CacheKey>,
}

/// Bounded in-memory audio cache. Cheap to share behind an `Arc`.
pub struct AudioCache {
    inner: RwLock<Inner>,
    max_entries: usize,
}

impl AudioCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_entries,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    // Entries are immutable buffers and every mutation below completes
    // before the guard drops, so a poisoned lock still holds a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        self.read().entries.get(key).cloned()
    }

    /// Store `audio` under `key` unless the cache is already full.
    ///
    /// Returns whether the buffer was stored. The size check and the insert
    /// happen under one write guard, so concurrent inserts never push the
    /// count past the bound.
    pub fn insert(&self, key: CacheKey, audio: impl Into<Arc<[u8]>>) -> bool {
        let mut inner = self.write();
        if inner.entries.len() >= self.max_entries {
            return false;
        }
        if inner.entries.insert(key.clone(), audio.into()).is_none() {
            inner.order.push(key);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_entries
    }

    /// Drop every entry, reporting what was held just before.
    pub fn clear(&self) -> ClearReport {
        let mut inner = self.write();
        let report = ClearReport {
            cleared_entries: inner.entries.len(),
            freed_bytes: inner.entries.values().map(|audio| audio.len()).sum(),
        };
        inner.entries.clear();
        inner.order.clear();
        report
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.read();

        let mut summaries: Vec<EntrySummary> = inner
            .order
            .iter()
            .filter_map(|key| {
                inner.entries.get(key).map(|audio| EntrySummary {
                    key: key.preview(),
                    size_bytes: audio.len(),
                    size_kb: round_div(audio.len(), 1024),
                })
            })
            .collect();
        let total_bytes = summaries.iter().map(|s| s.size_bytes).sum();

        // Stable sort: equal sizes stay in insertion order.
        summaries.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        summaries.truncate(LARGEST_ENTRIES_SHOWN);

        CacheStats {
            total_entries: inner.entries.len(),
            total_bytes,
            largest_entries: summaries,
        }
    }
}

impl Default for AudioCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

/// Integer division rounded half up, for the human-facing KB/MB figures.
pub fn round_div(value: usize, unit: usize) -> usize {
    (value + unit / 2) / unit
}
