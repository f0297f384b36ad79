//! Cache for artifacts computed from downloads.
//!
//! Kept apart from the blob cache so that clearing one never touches the
//! other: it has its own memory tier, its own pressure subscription and its
//! own directory nested under the blob cache's.

use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::info;

use super::blob::{BlobCache, CacheStats, PendingWrite, StoragePolicy};
use super::disk::DiskUsage;
use super::CacheError;
use crate::config::CacheConfig;
use crate::pressure::MemoryPressure;

/// Sub-directory of the blob cache directory used by the derived cache.
pub const DERIVED_SUBDIRECTORY: &str = "derived";

/// Post-processed bytes, such as a shield image cropped out of a sprite
/// sheet and re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedArtifact(Bytes);

impl DerivedArtifact {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Two-tier cache of [`DerivedArtifact`]s.
#[derive(Debug)]
pub struct DerivedCache {
    inner: Arc<BlobCache>,
}

impl DerivedCache {
    /// Create a derived cache under `config.directory/derived` on the
    /// current runtime.
    pub fn new(config: &CacheConfig, pressure: &MemoryPressure) -> Result<Self, CacheError> {
        Ok(Self {
            inner: BlobCache::new(config.nested(DERIVED_SUBDIRECTORY), pressure)?,
        })
    }

    pub fn with_runtime(config: &CacheConfig, pressure: &MemoryPressure, runtime: Handle) -> Self {
        Self {
            inner: BlobCache::with_runtime(config.nested(DERIVED_SUBDIRECTORY), pressure, runtime),
        }
    }

    pub fn store(&self, key: &str, artifact: DerivedArtifact, policy: StoragePolicy) -> PendingWrite {
        self.inner.store(key, artifact.into_bytes(), policy)
    }

    /// Look up an artifact in memory, then on disk.
    pub async fn artifact(&self, key: &str) -> Option<DerivedArtifact> {
        self.inner.read(key).await.map(DerivedArtifact)
    }

    pub fn artifact_in_memory(&self, key: &str) -> Option<DerivedArtifact> {
        self.inner.read_memory(key).map(DerivedArtifact)
    }

    pub fn clear_memory(&self) {
        self.inner.clear_memory();
    }

    pub async fn clear_disk(&self) {
        self.inner.clear_disk().await;
    }

    /// Clear both tiers.
    pub async fn clear(&self) {
        self.inner.clear_memory();
        self.inner.clear_disk().await;
        info!(dir = %self.inner.directory().display(), "Derived cache cleared");
    }

    pub async fn disk_usage(&self) -> DiskUsage {
        self.inner.disk_usage().await
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
