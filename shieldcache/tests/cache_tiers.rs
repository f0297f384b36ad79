//! Integration tests for the blob and derived-artifact caches.
//!
//! These tests verify behavior that spans both tiers and both caches:
//! - disk entries survive memory clears and cache restarts
//! - memory pressure empties every subscribed memory tier
//! - the derived cache is cleared independently of the blob cache
//!
//! Run with: `cargo test --test cache_tiers`

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tempfile::TempDir;

use shieldcache::config::CacheConfig;
use shieldcache::key::derive_key;
use shieldcache::{BlobCache, DerivedArtifact, DerivedCache, MemoryPressure, StoragePolicy};

const SHEET_URL: &str = "https://sprites.test/styles/v1/acme/day/sprite@2x.png";

// ============================================================================
// Helper Functions
// ============================================================================

fn cache_config(dir: &TempDir) -> CacheConfig {
    CacheConfig::new(dir.path().join("shields"))
}

fn caches(dir: &TempDir, pressure: &MemoryPressure) -> (Arc<BlobCache>, DerivedCache) {
    let config = cache_config(dir);
    let blobs = BlobCache::new(config.clone(), pressure).unwrap();
    let derived = DerivedCache::new(&config, pressure).unwrap();
    (blobs, derived)
}

// ============================================================================
// Blob Cache
// ============================================================================

#[tokio::test]
async fn test_disk_entry_survives_memory_clear() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, _) = caches(&dir, &pressure);

    blobs
        .store(SHEET_URL, Bytes::from_static(b"sheet"), StoragePolicy::MemoryAndDisk)
        .settled()
        .await;
    blobs.clear_memory();

    assert!(blobs.read_memory(SHEET_URL).is_none());
    assert_eq!(blobs.read(SHEET_URL).await, Some(Bytes::from_static(b"sheet")));
    // The disk hit was promoted.
    assert!(blobs.contains_in_memory(SHEET_URL));
}

#[tokio::test]
async fn test_disk_entry_survives_restart() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();

    {
        let (blobs, _) = caches(&dir, &pressure);
        blobs
            .store(SHEET_URL, Bytes::from_static(b"sheet"), StoragePolicy::MemoryAndDisk)
            .settled()
            .await;
    }

    let (blobs, _) = caches(&dir, &pressure);
    assert!(blobs
        .directory()
        .join(format!("{}.cache", derive_key(SHEET_URL)))
        .exists());
    assert_eq!(blobs.read(SHEET_URL).await, Some(Bytes::from_static(b"sheet")));
}

#[tokio::test]
async fn test_memory_only_entries_never_reach_disk() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, _) = caches(&dir, &pressure);

    blobs
        .store(SHEET_URL, Bytes::from_static(b"sheet"), StoragePolicy::MemoryOnly)
        .settled()
        .await;

    assert!(!blobs.contains_on_disk(SHEET_URL).await);
    assert_eq!(blobs.disk_usage().await.files, 0);

    blobs.clear_memory();
    assert_eq!(blobs.read(SHEET_URL).await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stores_are_all_readable() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, _) = caches(&dir, &pressure);

    let writes = (0..50).map(|i| {
        let blobs = Arc::clone(&blobs);
        tokio::spawn(async move {
            let key = format!("https://shields.test/route-{}.png", i);
            blobs
                .store(&key, Bytes::from(format!("shield-{}", i)), StoragePolicy::MemoryAndDisk)
                .settled()
                .await;
        })
    });
    for result in join_all(writes).await {
        result.unwrap();
    }

    blobs.clear_memory();
    for i in 0..50 {
        let key = format!("https://shields.test/route-{}.png", i);
        assert_eq!(blobs.read(&key).await, Some(Bytes::from(format!("shield-{}", i))));
    }
    assert_eq!(blobs.disk_usage().await.files, 50);
    // No temporary files are left behind.
    let leftovers = std::fs::read_dir(blobs.directory())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_memory_only_store_replaces_disk_copy() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, _) = caches(&dir, &pressure);

    blobs
        .store(SHEET_URL, Bytes::from_static(b"old"), StoragePolicy::MemoryAndDisk)
        .settled()
        .await;
    blobs
        .store(SHEET_URL, Bytes::from_static(b"new"), StoragePolicy::MemoryOnly)
        .settled()
        .await;

    assert_eq!(blobs.read_memory(SHEET_URL), Some(Bytes::from_static(b"new")));
    blobs.clear_memory();
    assert_eq!(blobs.read(SHEET_URL).await, None);
    assert_eq!(blobs.disk_usage().await.files, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsettled_stores_land_in_call_order() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, _) = caches(&dir, &pressure);

    let keys: Vec<String> = (0..100)
        .map(|i| format!("https://shields.test/route-{}.png", i))
        .collect();
    let mut pending = Vec::new();
    for key in &keys {
        let large = Bytes::from(vec![0u8; 200 * 1024]);
        pending.push(blobs.store(key, large, StoragePolicy::MemoryAndDisk));
        pending.push(blobs.store(key, Bytes::from_static(b"new"), StoragePolicy::MemoryAndDisk));
    }
    join_all(pending.into_iter().map(|write| write.settled())).await;

    blobs.clear_memory();
    for key in &keys {
        assert_eq!(blobs.read(key).await, Some(Bytes::from_static(b"new")), "{}", key);
    }
}

#[tokio::test]
async fn test_last_store_wins() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, _) = caches(&dir, &pressure);

    blobs
        .store(SHEET_URL, Bytes::from_static(b"old"), StoragePolicy::MemoryAndDisk)
        .settled()
        .await;
    blobs
        .store(SHEET_URL, Bytes::from_static(b"new"), StoragePolicy::MemoryAndDisk)
        .settled()
        .await;

    assert_eq!(blobs.read(SHEET_URL).await, Some(Bytes::from_static(b"new")));
    blobs.clear_memory();
    assert_eq!(blobs.read(SHEET_URL).await, Some(Bytes::from_static(b"new")));
}

// ============================================================================
// Memory Pressure
// ============================================================================

#[tokio::test]
async fn test_pressure_clears_every_memory_tier() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, derived) = caches(&dir, &pressure);

    blobs
        .store(SHEET_URL, Bytes::from_static(b"sheet"), StoragePolicy::MemoryAndDisk)
        .settled()
        .await;
    derived
        .store("crop", DerivedArtifact::new(&b"crop"[..]), StoragePolicy::MemoryOnly)
        .settled()
        .await;

    pressure.notify();

    assert!(blobs.read_memory(SHEET_URL).is_none());
    assert!(derived.artifact_in_memory("crop").is_none());
    // Disk is untouched by pressure.
    assert!(blobs.contains_on_disk(SHEET_URL).await);
}

#[tokio::test]
async fn test_pressure_after_cache_dropped() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, derived) = caches(&dir, &pressure);
    assert_eq!(pressure.listener_count(), 2);

    drop(blobs);
    drop(derived);
    assert_eq!(pressure.listener_count(), 0);

    pressure.notify();
}

// ============================================================================
// Derived Cache
// ============================================================================

#[tokio::test]
async fn test_derived_cache_is_independent() {
    let dir = TempDir::new().unwrap();
    let pressure = MemoryPressure::new();
    let (blobs, derived) = caches(&dir, &pressure);

    blobs
        .store(SHEET_URL, Bytes::from_static(b"sheet"), StoragePolicy::MemoryAndDisk)
        .settled()
        .await;
    derived
        .store(
            &format!("{}-us-interstate-3", SHEET_URL),
            DerivedArtifact::new(&b"crop"[..]),
            StoragePolicy::MemoryAndDisk,
        )
        .settled()
        .await;

    // Clearing the blob disk tier leaves the derived subdirectory alone.
    blobs.clear_disk().await;
    blobs.clear_memory();
    derived.clear_memory();
    assert_eq!(blobs.read(SHEET_URL).await, None);
    let crop = derived
        .artifact(&format!("{}-us-interstate-3", SHEET_URL))
        .await
        .unwrap();
    assert_eq!(crop.as_bytes(), &Bytes::from_static(b"crop"));

    // Clearing the derived cache leaves blobs alone.
    blobs
        .store(SHEET_URL, Bytes::from_static(b"sheet"), StoragePolicy::MemoryAndDisk)
        .settled()
        .await;
    derived.clear().await;
    assert_eq!(derived.disk_usage().await.files, 0);
    assert_eq!(blobs.read(SHEET_URL).await, Some(Bytes::from_static(b"sheet")));
}
