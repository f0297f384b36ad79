//! The blob cache combining the memory and disk tiers.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::disk::{DiskTier, DiskUsage};
use super::memory::MemoryTier;
use super::CacheError;
use crate::config::CacheConfig;
use crate::pressure::{MemoryPressure, Subscription};

/// Where a stored entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoragePolicy {
    /// Memory tier only; never written to disk.
    MemoryOnly,
    /// Memory tier plus a persistent file.
    MemoryAndDisk,
}

/// Completion of a [`BlobCache::store`].
///
/// The memory write has already happened when this is returned. Awaiting
/// [`settled`](Self::settled) waits for the disk side of the store: the
/// write, or for memory-only entries the removal of any older disk copy.
/// Dropping it leaves that work running.
#[must_use = "await `settled()` to observe the disk side of the store, or drop to detach"]
pub struct PendingWrite {
    task: JoinHandle<()>,
}

impl PendingWrite {
    /// Resolves once the disk work has settled, successfully or not.
    pub async fn settled(self) {
        let _ = self.task.await;
    }
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWrite")
            .field("settled", &self.task.is_finished())
            .finish()
    }
}

/// Hit/miss counters and memory occupancy for one cache instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from memory.
    pub memory_hits: u64,
    /// Reads that missed memory.
    pub memory_misses: u64,
    /// Memory misses served from disk.
    pub disk_hits: u64,
    /// Reads that missed both tiers.
    pub disk_misses: u64,
    /// Entries currently in memory.
    pub memory_entries: u64,
    /// Bytes currently in memory.
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Fraction of reads answered by either tier.
    pub fn hit_rate(&self) -> f64 {
        let total = self.memory_hits + self.memory_misses;
        if total == 0 {
            0.0
        } else {
            (self.memory_hits + self.disk_hits) as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
}

/// Key-value store for downloaded bytes with a memory and a disk tier.
///
/// Keys are raw resource keys (usually URLs); the disk tier addresses them
/// by [`derive_key`](crate::key::derive_key). Constructed behind an `Arc`
/// because its memory-pressure listener refers back to it weakly.
pub struct BlobCache {
    memory: MemoryTier,
    disk: Arc<DiskTier>,
    runtime: Handle,
    counters: Counters,
    _pressure: Subscription,
}

impl BlobCache {
    /// Create a cache on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Spawn`] when called outside a runtime.
    pub fn new(config: CacheConfig, pressure: &MemoryPressure) -> Result<Arc<Self>, CacheError> {
        let runtime = Handle::try_current().map_err(|e| CacheError::Spawn(e.to_string()))?;
        Ok(Self::with_runtime(config, pressure, runtime))
    }

    /// Create a cache whose disk writes run on `runtime`.
    pub fn with_runtime(
        config: CacheConfig,
        pressure: &MemoryPressure,
        runtime: Handle,
    ) -> Arc<Self> {
        debug!(
            dir = %config.directory.display(),
            max_bytes = config.memory_capacity_bytes,
            "Creating blob cache"
        );

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = pressure.subscribe(move || {
                if let Some(cache) = weak.upgrade() {
                    debug!(dir = %cache.directory().display(), "Memory pressure, dropping memory tier");
                    cache.clear_memory();
                }
            });

            Self {
                memory: MemoryTier::new(config.memory_capacity_bytes, config.memory_ttl),
                disk: Arc::new(DiskTier::new(config.directory)),
                runtime,
                counters: Counters::default(),
                _pressure: subscription,
            }
        })
    }

    /// Directory holding this cache's disk tier.
    pub fn directory(&self) -> &Path {
        self.disk.directory()
    }

    /// Store `data` under `key`.
    ///
    /// The memory write is complete when this returns. The disk side is
    /// spawned and reported through the returned [`PendingWrite`]: with
    /// [`StoragePolicy::MemoryAndDisk`] the entry is written, with
    /// [`StoragePolicy::MemoryOnly`] any older disk copy is removed. Disk
    /// work for one key lands in the order of the `store` calls, and a
    /// failure is logged while the memory entry stays.
    pub fn store(&self, key: &str, data: Bytes, policy: StoragePolicy) -> PendingWrite {
        self.memory.insert(key, data.clone());

        let key_owned = key.to_string();
        let task = match policy {
            StoragePolicy::MemoryOnly => {
                let removal = self.disk.remove(key);
                self.runtime.spawn(async move {
                    if let Err(e) = removal.await {
                        warn!(key = %key_owned, error = %e, "Failed to drop stale disk copy");
                    }
                })
            }
            StoragePolicy::MemoryAndDisk => {
                let write = self.disk.write(key, data);
                self.runtime.spawn(async move {
                    if let Err(e) = write.await {
                        warn!(key = %key_owned, error = %e, "Failed to write cache entry to disk");
                    }
                })
            }
        };
        PendingWrite { task }
    }

    /// Read `key`, checking memory first and then disk.
    ///
    /// A disk hit is copied back into memory. Absence (or an unreadable
    /// file) is `None`.
    pub async fn read(&self, key: &str) -> Option<Bytes> {
        if let Some(data) = self.memory.get(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(data);
        }
        self.counters.memory_misses.fetch_add(1, Ordering::Relaxed);

        match self.disk.read(key).await {
            Ok(Some(data)) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                self.memory.insert(key, data.clone());
                Some(data)
            }
            Ok(None) => {
                self.counters.disk_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.counters.disk_misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to read cache entry from disk");
                None
            }
        }
    }

    /// Memory-only lookup; never touches disk.
    pub fn read_memory(&self, key: &str) -> Option<Bytes> {
        self.memory.get(key)
    }

    pub fn contains_in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    pub async fn contains_on_disk(&self, key: &str) -> bool {
        self.disk.contains(key).await
    }

    /// Drop `key` from both tiers.
    pub async fn remove(&self, key: &str) {
        self.memory.remove(key);
        if let Err(e) = self.disk.remove(key).await {
            warn!(key = %key, error = %e, "Failed to remove cache entry from disk");
        }
    }

    /// Drop the memory tier. Disk entries are untouched.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Remove every file of this cache's disk tier.
    ///
    /// Always completes; failures are logged.
    pub async fn clear_disk(&self) {
        let (removed, error) = self.disk.clear().await;
        if let Some(e) = error {
            warn!(dir = %self.directory().display(), removed, error = %e, "Disk cache clear incomplete");
        } else {
            info!(dir = %self.directory().display(), removed, "Disk cache cleared");
        }
    }

    /// Files and bytes on disk. Unreadable directories count as empty.
    pub async fn disk_usage(&self) -> DiskUsage {
        match self.disk.usage().await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(dir = %self.directory().display(), error = %e, "Failed to scan disk cache");
                DiskUsage::default()
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.counters.memory_misses.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.counters.disk_misses.load(Ordering::Relaxed),
            memory_entries: self.memory.entry_count(),
            memory_bytes: self.memory.size_bytes(),
        }
    }
}

impl fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobCache")
            .field("directory", &self.directory())
            .field("max_memory_bytes", &self.memory.max_size_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_cache(pressure: &MemoryPressure) -> (TempDir, Arc<BlobCache>) {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig::new(temp_dir.path().join("blobs"));
        let cache = BlobCache::new(config, pressure).unwrap();
        (temp_dir, cache)
    }

    #[tokio::test]
    async fn test_store_visible_before_disk_write() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        let pending = cache.store("k", Bytes::from_static(b"v"), StoragePolicy::MemoryAndDisk);
        assert_eq!(cache.read_memory("k"), Some(Bytes::from_static(b"v")));
        pending.settled().await;
        assert!(cache.contains_on_disk("k").await);
    }

    #[tokio::test]
    async fn test_memory_only_never_hits_disk() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        cache
            .store("k", Bytes::from_static(b"v"), StoragePolicy::MemoryOnly)
            .settled()
            .await;

        assert!(!cache.contains_on_disk("k").await);
        cache.clear_memory();
        assert!(cache.read("k").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_only_store_drops_older_disk_copy() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        cache
            .store("k", Bytes::from_static(b"old"), StoragePolicy::MemoryAndDisk)
            .settled()
            .await;
        cache
            .store("k", Bytes::from_static(b"new"), StoragePolicy::MemoryOnly)
            .settled()
            .await;

        assert!(!cache.contains_on_disk("k").await);
        cache.clear_memory();
        assert_eq!(cache.read("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_only_store_supersedes_unsettled_write() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        let write = cache.store("k", Bytes::from_static(b"old"), StoragePolicy::MemoryAndDisk);
        let removal = cache.store("k", Bytes::from_static(b"new"), StoragePolicy::MemoryOnly);
        removal.settled().await;
        write.settled().await;

        assert!(!cache.contains_on_disk("k").await);
        cache.clear_memory();
        assert_eq!(cache.read("k").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_store_reaches_disk() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        for round in 0..50 {
            let key = format!("k{}", round);
            let large = cache.store(
                &key,
                Bytes::from(vec![1u8; 200 * 1024]),
                StoragePolicy::MemoryAndDisk,
            );
            let small = cache.store(&key, Bytes::from_static(b"new"), StoragePolicy::MemoryAndDisk);
            small.settled().await;
            large.settled().await;
        }

        cache.clear_memory();
        for round in 0..50 {
            let key = format!("k{}", round);
            assert_eq!(cache.read(&key).await, Some(Bytes::from_static(b"new")), "{}", key);
        }
    }

    #[tokio::test]
    async fn test_disk_hit_promoted_to_memory() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        cache
            .store("k", Bytes::from_static(b"v"), StoragePolicy::MemoryAndDisk)
            .settled()
            .await;
        cache.clear_memory();
        assert!(!cache.contains_in_memory("k"));

        assert_eq!(cache.read("k").await, Some(Bytes::from_static(b"v")));
        assert!(cache.contains_in_memory("k"));

        let stats = cache.stats();
        assert_eq!(stats.memory_misses, 1);
        assert_eq!(stats.disk_hits, 1);
    }

    #[tokio::test]
    async fn test_remove_drops_both_tiers() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        cache
            .store("k", Bytes::from_static(b"v"), StoragePolicy::MemoryAndDisk)
            .settled()
            .await;
        cache.remove("k").await;

        assert!(!cache.contains_in_memory("k"));
        assert!(!cache.contains_on_disk("k").await);
    }

    #[tokio::test]
    async fn test_clear_disk_keeps_memory() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        cache
            .store("k", Bytes::from_static(b"v"), StoragePolicy::MemoryAndDisk)
            .settled()
            .await;
        cache.clear_disk().await;

        assert!(!cache.contains_on_disk("k").await);
        assert_eq!(cache.read_memory("k"), Some(Bytes::from_static(b"v")));
        assert_eq!(cache.disk_usage().await, DiskUsage::default());
    }

    #[tokio::test]
    async fn test_pressure_clears_memory_tier() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);

        cache
            .store("k", Bytes::from_static(b"v"), StoragePolicy::MemoryAndDisk)
            .settled()
            .await;
        pressure.notify();

        assert!(!cache.contains_in_memory("k"));
        assert!(cache.contains_on_disk("k").await);
    }

    #[tokio::test]
    async fn test_dropping_cache_unsubscribes() {
        let pressure = MemoryPressure::new();
        let (_dir, cache) = create_test_cache(&pressure);
        assert_eq!(pressure.listener_count(), 1);

        drop(cache);
        assert_eq!(pressure.listener_count(), 0);
        pressure.notify();
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let pressure = MemoryPressure::new();
        let temp_dir = TempDir::new().unwrap();
        let result = BlobCache::new(CacheConfig::new(temp_dir.path()), &pressure);
        assert!(matches!(result, Err(CacheError::Spawn(_))));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            memory_hits: 2,
            memory_misses: 2,
            disk_hits: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
