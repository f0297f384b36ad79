//! Disk tier: one file per entry in a flat directory.
//!
//! # File Layout
//!
//! ```text
//! {cache_dir}/{derive_key(key)}.cache
//! ```
//!
//! Writes go to a uniquely named `.tmp` file first and are renamed into
//! place, so a reader never sees a partially written entry. Clearing only
//! touches `.cache` and `.tmp` files at the top level, which leaves nested
//! cache directories (such as the derived cache) alone.
//!
//! # Ordering
//!
//! Writes and removals run as detached tasks, so they can finish in any
//! order. Each one takes a generation when it is scheduled and only touches
//! the entry file if no later-scheduled operation on the same key has run
//! yet. A clear supersedes everything scheduled before it.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;

use super::CacheError;
use crate::key::derive_key;

const ENTRY_EXTENSION: &str = "cache";
const TEMP_EXTENSION: &str = "tmp";

/// Files and bytes held by a disk tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Number of entry files.
    pub files: u64,
    /// Total size of entry files in bytes.
    pub bytes: u64,
}

/// Per-key slots holding the generation of the last operation that ran.
#[derive(Default)]
struct WriteOrder {
    next_generation: AtomicU64,
    cleared_before: AtomicU64,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<u64>>>>,
}

impl WriteOrder {
    fn ticket(self: &Arc<Self>, key: &str) -> Ticket {
        let mut slots = self.slots.lock();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = Arc::clone(slots.entry(key.to_string()).or_default());
        Ticket {
            order: Arc::clone(self),
            key: key.to_string(),
            generation,
            slot,
        }
    }

    /// Supersede every operation scheduled so far.
    fn clear(&self) {
        let cutoff = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cleared_before.fetch_max(cutoff, Ordering::SeqCst);
    }
}

/// A scheduled operation's place in its key's order.
struct Ticket {
    order: Arc<WriteOrder>,
    key: String,
    generation: u64,
    slot: Arc<AsyncMutex<u64>>,
}

impl Ticket {
    /// Hold the key's slot, or `None` if a later operation already ran or a
    /// clear superseded this one.
    ///
    /// The caller records its generation in the slot once it touched the
    /// entry file.
    async fn acquire(&self) -> Option<MutexGuard<'_, u64>> {
        let applied = self.slot.lock().await;
        if *applied > self.generation || self.is_cleared() {
            return None;
        }
        Some(applied)
    }

    fn is_cleared(&self) -> bool {
        self.generation < self.order.cleared_before.load(Ordering::SeqCst)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut slots = self.order.slots.lock();
        // Only the map and this ticket hold the slot: nothing else is
        // scheduled for the key.
        let idle = Arc::strong_count(&self.slot) == 2
            && slots
                .get(&self.key)
                .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot));
        if idle {
            slots.remove(&self.key);
        }
    }
}

pub(crate) struct DiskTier {
    directory: PathBuf,
    temp_counter: AtomicU64,
    order: Arc<WriteOrder>,
}

impl DiskTier {
    pub(crate) fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            temp_counter: AtomicU64::new(0),
            order: Arc::new(WriteOrder::default()),
        }
    }

    pub(crate) fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file holding `key`.
    pub(crate) fn entry_path(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", derive_key(key), ENTRY_EXTENSION))
    }

    /// Schedule a write of `key` as a detached future.
    ///
    /// The write's place in the key's order is fixed by this call, not by
    /// when the future runs. Resolves to `false` when a later operation on
    /// the key superseded it.
    pub(crate) fn write(
        &self,
        key: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send + 'static {
        let ticket = self.order.ticket(key);
        let directory = self.directory.clone();
        let path = self.entry_path(key);
        let sequence = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}.{}", sequence, TEMP_EXTENSION));

        async move {
            tokio::fs::create_dir_all(&directory).await?;
            tokio::fs::write(&temp_path, &data).await?;

            let Some(mut applied) = ticket.acquire().await else {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Ok(false);
            };
            *applied = ticket.generation;

            if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
                let _ = tokio::fs::remove_file(&temp_path).await;
                // An older copy must not outlive a failed replacement.
                let _ = tokio::fs::remove_file(&path).await;
                if ticket.is_cleared() {
                    return Ok(false);
                }
                return Err(CacheError::Io(e));
            }
            if ticket.is_cleared() {
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(false);
            }
            Ok(true)
        }
    }

    pub(crate) async fn read(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    pub(crate) async fn contains(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.entry_path(key))
            .await
            .unwrap_or(false)
    }

    /// Schedule removal of `key`'s file, ordered with its writes.
    ///
    /// Resolves to whether a file was removed.
    pub(crate) fn remove(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send + 'static {
        let ticket = self.order.ticket(key);
        let path = self.entry_path(key);

        async move {
            let Some(mut applied) = ticket.acquire().await else {
                return Ok(false);
            };
            *applied = ticket.generation;

            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(CacheError::Io(e)),
            }
        }
    }

    /// Remove every entry file of this tier.
    ///
    /// Writes and removals scheduled before the call are superseded. Keeps
    /// going past individual failures and returns the first one after the
    /// sweep, along with the number of files removed.
    pub(crate) async fn clear(&self) -> (usize, Option<CacheError>) {
        self.order.clear();

        let files = match self.collect_files().await {
            Ok(files) => files,
            Err(e) => return (0, Some(e)),
        };

        let mut removed = 0;
        let mut first_error = None;
        for (path, _) in files {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to remove cache file");
                    first_error.get_or_insert(CacheError::Io(e));
                }
            }
        }
        (removed, first_error)
    }

    pub(crate) async fn usage(&self) -> Result<DiskUsage, CacheError> {
        let files = self.collect_files().await?;
        Ok(files
            .iter()
            .filter(|(path, _)| has_extension(path, ENTRY_EXTENSION))
            .fold(DiskUsage::default(), |usage, (_, size)| DiskUsage {
                files: usage.files + 1,
                bytes: usage.bytes + size,
            }))
    }

    /// Collect `.cache` and `.tmp` files at the top level of the directory.
    ///
    /// A missing directory is an empty tier.
    async fn collect_files(&self) -> Result<Vec<(PathBuf, u64)>, CacheError> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !(has_extension(&path, ENTRY_EXTENSION) || has_extension(&path, TEMP_EXTENSION)) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            files.push((path, metadata.len()));
        }
        Ok(files)
    }
}

#[cfg(test)]
impl DiskTier {
    /// Keys with operations still scheduled.
    fn scheduled_keys(&self) -> usize {
        self.order.slots.lock().len()
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext == extension)
}
