//! Coalesced, cancellable downloads.
//!
//! [`DownloadCoordinator`] keeps at most one network operation in flight per
//! resource key. Callers register a completion (or await
//! [`DownloadCoordinator::fetch_async`]); every caller of one key receives
//! the same [`Download`] or [`FetchError`].

mod coordinator;
mod error;
mod operation;

pub use coordinator::{CoordinatorStats, DownloadCoordinator, OperationHandle};
pub use error::FetchError;
pub use operation::{Completion, Download, Operation, OperationState};
