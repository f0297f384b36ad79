//! Lifecycle of one shared network operation.
//!
//! ```text
//! Ready ──start──► Executing ──finish──► Finished
//!   │                                       ▲
//!   └──────────────cancel───────────────────┘
//! ```
//!
//! `cancelled` is a flag on top of the state: a cancelled operation is
//! always `Finished`. Whichever of completion and cancellation reaches
//! `finish` first wins; the loser sees `None` and delivers nothing.

use std::fmt;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::FetchError;

/// Payload delivered to every caller of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// The resource key that was fetched.
    pub key: String,
    /// Response body. Shared, not copied, between callers.
    pub data: Bytes,
    /// HTTP status, `None` for local files.
    pub status: Option<u16>,
}

/// Callback invoked once with the outcome of a fetch.
pub type Completion = Box<dyn FnOnce(Result<Download, FetchError>) + Send + 'static>;

/// Lifecycle state of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Ready,
    Executing,
    Finished,
}

struct Inner {
    state: OperationState,
    cancelled: bool,
    completions: Vec<Completion>,
}

/// One in-flight fetch shared by every caller that asked for its key.
pub struct Operation {
    id: u64,
    key: String,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl Operation {
    pub(crate) fn new(id: u64, key: &str) -> Self {
        Self {
            id,
            key: key.to_string(),
            inner: Mutex::new(Inner {
                state: OperationState::Ready,
                cancelled: false,
                completions: Vec::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// A `Ready` operation with its first caller already registered.
    pub(crate) fn with_completion(id: u64, key: &str, completion: Completion) -> Self {
        let op = Self::new(id, key);
        op.inner.lock().completions.push(completion);
        op
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == OperationState::Ready
    }

    pub fn is_executing(&self) -> bool {
        self.state() == OperationState::Executing
    }

    pub fn is_finished(&self) -> bool {
        self.state() == OperationState::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// Number of callers still waiting for the outcome.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().completions.len()
    }

    /// Register another caller. Hands the completion back if the operation
    /// has already finished.
    pub(crate) fn add_completion(&self, completion: Completion) -> Result<(), Completion> {
        let mut inner = self.inner.lock();
        if inner.state == OperationState::Finished {
            return Err(completion);
        }
        inner.completions.push(completion);
        Ok(())
    }

    /// Move from `Ready` to `Executing`.
    pub(crate) fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != OperationState::Ready {
            return false;
        }
        inner.state = OperationState::Executing;
        true
    }

    /// Move to `Finished` and take the pending completions, in
    /// registration order.
    ///
    /// Returns `None` if the operation had already finished.
    pub(crate) fn finish(&self, cancelled: bool) -> Option<Vec<Completion>> {
        let mut inner = self.inner.lock();
        if inner.state == OperationState::Finished {
            return None;
        }
        inner.state = OperationState::Finished;
        inner.cancelled = cancelled;
        if cancelled {
            self.cancel.cancel();
        }
        Some(std::mem::take(&mut inner.completions))
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("cancelled", &inner.cancelled)
            .field("waiters", &inner.completions.len())
            .finish()
    }
}
