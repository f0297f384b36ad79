//! Two-tier (memory + disk) blob cache.
//!
//! A [`BlobCache`] keeps downloaded bytes in a bounded moka memory tier and,
//! when asked to, persists them as one file per entry in its own directory.
//! Reads check memory first, then disk, promoting disk hits back into memory.
//!
//! The memory tier is dropped whenever the shared
//! [`MemoryPressure`](crate::pressure::MemoryPressure) signal fires; the disk
//! tier persists until [`BlobCache::clear_disk`] is called.
//!
//! [`DerivedCache`] is a separate instance for post-processed artifacts such
//! as shield images cropped out of a sprite sheet.

mod blob;
mod derived;
mod disk;
mod memory;

pub use blob::{BlobCache, CacheStats, PendingWrite, StoragePolicy};
pub use derived::{DerivedArtifact, DerivedCache, DERIVED_SUBDIRECTORY};
pub use disk::DiskUsage;

use thiserror::Error;

/// Errors raised inside the cache tiers.
///
/// Disk failures are logged and never reach `store` or `clear_disk`
/// callers; only cache construction returns one.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error in the disk tier.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No runtime available to run disk writes on.
    #[error("Failed to spawn task: {0}")]
    Spawn(String),
}
