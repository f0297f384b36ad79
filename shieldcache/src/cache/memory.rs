//! Memory tier backed by `moka::sync::Cache`.
//!
//! moka gives lock-free reads and size-bounded eviction without an outer
//! lock. The synchronous flavour is used so a `store` is visible to every
//! thread as soon as it returns, without awaiting.

use std::time::Duration;

use bytes::Bytes;
use moka::sync::Cache as MokaCache;

/// Size-bounded in-memory map from raw key to bytes.
pub(crate) struct MemoryTier {
    cache: MokaCache<String, Bytes>,
    max_size_bytes: u64,
}

impl MemoryTier {
    /// Create a memory tier holding at most `max_size_bytes` of payload.
    pub(crate) fn new(max_size_bytes: u64, ttl: Option<Duration>) -> Self {
        let mut builder = MokaCache::builder()
            // Weight each entry by its payload size
            .weigher(|_key: &String, value: &Bytes| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes);

        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            cache: builder.build(),
            max_size_bytes,
        }
    }

    pub(crate) fn insert(&self, key: &str, value: Bytes) {
        self.cache.insert(key.to_string(), value);
    }

    pub(crate) fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub(crate) fn remove(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Drop every entry. Entries are invisible to readers immediately,
    /// even before moka reclaims their space.
    pub(crate) fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub(crate) fn size_bytes(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    pub(crate) fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }
}
