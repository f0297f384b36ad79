//! Download coordinator with per-key request coalescing.
//!
//! # Architecture
//!
//! ```text
//! fetch(A) ─┐
//!           │                                 Transport
//! fetch(A) ─┼──► DownloadCoordinator ───────► (one request)
//!           │        │                            │
//! fetch(A) ─┘        │                            │
//!                    ▼                            ▼
//!            [all three completions  ◄──── [one result]
//!             get the same result]
//! ```
//!
//! The in-flight map is the single source of truth for "is this key being
//! fetched". A key stays in the map from the first `fetch` until the
//! operation finishes or is cancelled, and every `fetch` for that key in the
//! meantime joins the existing operation instead of starting a new one.
//!
//! Lock order is always map, then operation. Completions run after every
//! lock is released, so a completion may call back into the coordinator.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::error::FetchError;
use super::operation::{Completion, Download, Operation, OperationState};
use crate::config::DownloaderConfig;
use crate::transport::{Transport, TransportError, TransportRequest};

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Total `fetch` calls.
    pub total_requests: u64,
    /// Calls that joined an operation already in flight.
    pub coalesced_requests: u64,
    /// Operations started.
    pub started: u64,
    /// Operations that ran to completion, successfully or not.
    pub completed: u64,
    /// Operations that were cancelled.
    pub cancelled: u64,
}

impl CoordinatorStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
}

struct Shared {
    in_flight: Mutex<HashMap<String, Arc<Operation>>>,
    transport: Arc<dyn Transport>,
    config: DownloaderConfig,
    runtime: Handle,
    next_id: AtomicU64,
    counters: Counters,
}

/// Handle to the operation a `fetch` call joined.
///
/// Does not keep the coordinator alive.
#[derive(Clone)]
pub struct OperationHandle {
    op: Arc<Operation>,
    shared: Weak<Shared>,
}

impl OperationHandle {
    pub fn key(&self) -> &str {
        self.op.key()
    }

    /// Identifier of the shared operation. Coalesced callers see the same id.
    pub fn id(&self) -> u64 {
        self.op.id()
    }

    pub fn state(&self) -> OperationState {
        self.op.state()
    }

    pub fn is_ready(&self) -> bool {
        self.op.is_ready()
    }

    pub fn is_executing(&self) -> bool {
        self.op.is_executing()
    }

    pub fn is_finished(&self) -> bool {
        self.op.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.op.is_cancelled()
    }

    /// Cancel the shared operation for every caller.
    ///
    /// Returns `false` if it had already finished.
    pub fn cancel(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.cancel_operation(&self.op),
            None => false,
        }
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OperationHandle").field(&self.op).finish()
    }
}

/// Guarantees at most one in-flight network operation per resource key.
///
/// Keys are URLs. `http` and `https` keys go through the [`Transport`];
/// `file` keys are read from the local filesystem. Each operation is
/// bounded by [`DownloaderConfig::request_timeout`] and never retried.
pub struct DownloadCoordinator {
    shared: Arc<Shared>,
}

impl DownloadCoordinator {
    /// Create a coordinator that runs transfers on `runtime`.
    pub fn new(transport: Arc<dyn Transport>, config: DownloaderConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                in_flight: Mutex::new(HashMap::new()),
                transport,
                config,
                runtime,
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Fetch `key` and invoke `completion` exactly once with the outcome.
    ///
    /// If an operation for `key` is already in flight, `completion` joins it
    /// and no new request is made. Completions of one operation run in
    /// registration order on a runtime thread; a cancelled operation
    /// delivers [`FetchError::Cancelled`] on the cancelling thread.
    pub fn fetch<F>(&self, key: &str, completion: F) -> OperationHandle
    where
        F: FnOnce(Result<Download, FetchError>) + Send + 'static,
    {
        let shared = &self.shared;
        shared.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut completion: Completion = Box::new(completion);
        let mut in_flight = shared.in_flight.lock();

        if let Some(op) = in_flight.get(key) {
            match op.add_completion(completion) {
                Ok(()) => {
                    let coalesced =
                        shared.counters.coalesced_requests.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        key = %key,
                        waiters = op.waiter_count(),
                        coalesced,
                        "Coalescing request - joining in-flight download"
                    );
                    return self.handle(op);
                }
                // Finished but not yet removed; replace it below.
                Err(rejected) => completion = rejected,
            }
        }

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let op = Arc::new(Operation::with_completion(id, key, completion));
        in_flight.insert(key.to_string(), Arc::clone(&op));
        op.start();
        shared.counters.started.fetch_add(1, Ordering::Relaxed);
        debug!(
            key = %key,
            id,
            in_flight_count = in_flight.len(),
            "New request - starting download"
        );
        drop(in_flight);

        shared
            .runtime
            .spawn(Shared::run(Arc::clone(shared), Arc::clone(&op)));

        self.handle(&op)
    }

    /// Fetch `key` and await the outcome.
    ///
    /// Dropping the returned future does not cancel the operation, since
    /// other callers may be waiting on it.
    pub async fn fetch_async(&self, key: &str) -> Result<Download, FetchError> {
        let (tx, rx) = oneshot::channel();
        let _handle = self.fetch(key, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or_else(|_| {
            Err(FetchError::Cancelled {
                url: key.to_string(),
            })
        })
    }

    /// Cancel the in-flight operation for `key` for every caller.
    ///
    /// Returns `false` if nothing was in flight for `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let op = self.shared.in_flight.lock().get(key).cloned();
        match op {
            Some(op) => self.shared.cancel_operation(&op),
            None => false,
        }
    }

    /// Cancel every in-flight operation. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ops: Vec<Arc<Operation>> = self
            .shared
            .in_flight
            .lock()
            .drain()
            .map(|(_, op)| op)
            .collect();

        let cancelled = ops
            .iter()
            .filter(|op| self.shared.cancel_operation(op))
            .count();
        if cancelled > 0 {
            info!(cancelled, "Cancelled all in-flight downloads");
        }
        cancelled
    }

    /// Runtime that transfers and completions run on.
    pub fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.shared.in_flight.lock().contains_key(key)
    }

    /// Returns a snapshot of the current statistics.
    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.shared.counters;
        CoordinatorStats {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            coalesced_requests: c.coalesced_requests.load(Ordering::Relaxed),
            started: c.started.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Logs current statistics.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total_requests = stats.total_requests,
            coalesced = stats.coalesced_requests,
            started = stats.started,
            completed = stats.completed,
            cancelled = stats.cancelled,
            in_flight = self.in_flight_count(),
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "Download coalescing statistics"
        );
    }

    fn handle(&self, op: &Arc<Operation>) -> OperationHandle {
        OperationHandle {
            op: Arc::clone(op),
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("in_flight", &self.in_flight_count())
            .field("request_timeout", &self.shared.config.request_timeout)
            .finish()
    }
}

impl Shared {
    /// Drive one operation to completion unless it is cancelled first.
    async fn run(shared: Arc<Shared>, op: Arc<Operation>) {
        let key = op.key().to_string();
        let token = op.cancellation_token().clone();
        let timeout = shared.config.request_timeout;

        let result = tokio::select! {
            _ = token.cancelled() => return,
            outcome = tokio::time::timeout(timeout, shared.perform(&key)) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Download timed out");
                    Err(FetchError::Transport {
                        url: key.clone(),
                        source: TransportError::Timeout,
                    })
                }
            },
        };

        shared.complete(&op, result);
    }

    async fn perform(&self, key: &str) -> Result<Download, FetchError> {
        let url = reqwest::Url::parse(key).map_err(|e| FetchError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {
                let request = TransportRequest::get(key).with_headers(&self.config.headers);
                let response =
                    self.transport
                        .send(request)
                        .await
                        .map_err(|source| FetchError::Transport {
                            url: key.to_string(),
                            source,
                        })?;

                if response.is_error() {
                    return Err(FetchError::Server {
                        url: key.to_string(),
                        status: response.status,
                    });
                }

                Ok(Download {
                    key: key.to_string(),
                    data: response.body,
                    status: Some(response.status),
                })
            }
            "file" => {
                let path = url.to_file_path().map_err(|_| FetchError::LocalResource {
                    path: key.to_string(),
                    reason: "not a local file path".to_string(),
                })?;
                let data =
                    tokio::fs::read(&path)
                        .await
                        .map_err(|e| FetchError::LocalResource {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        })?;

                Ok(Download {
                    key: key.to_string(),
                    data: data.into(),
                    status: None,
                })
            }
            other => Err(FetchError::InvalidKey {
                key: key.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    fn complete(&self, op: &Arc<Operation>, result: Result<Download, FetchError>) {
        let completions = {
            let mut in_flight = self.in_flight.lock();
            self.remove_if_current(&mut in_flight, op);
            op.finish(false)
        };
        // Cancelled first; its completions were already delivered.
        let Some(completions) = completions else {
            return;
        };

        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(download) => debug!(
                key = %op.key(),
                bytes = download.data.len(),
                waiters = completions.len(),
                "Download finished"
            ),
            Err(e) => debug!(
                key = %op.key(),
                error = %e,
                waiters = completions.len(),
                "Download failed"
            ),
        }

        deliver(op.key(), completions, &result);
    }

    fn cancel_operation(&self, op: &Arc<Operation>) -> bool {
        let completions = {
            let mut in_flight = self.in_flight.lock();
            self.remove_if_current(&mut in_flight, op);
            op.finish(true)
        };
        let Some(completions) = completions else {
            return false;
        };

        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(key = %op.key(), waiters = completions.len(), "Download cancelled");

        let result = Err(FetchError::Cancelled {
            url: op.key().to_string(),
        });
        deliver(op.key(), completions, &result);
        true
    }

    /// Remove `op` from the map only if it is still the entry for its key;
    /// a newer operation for the same key may have replaced it.
    fn remove_if_current(&self, in_flight: &mut HashMap<String, Arc<Operation>>, op: &Arc<Operation>) {
        if in_flight
            .get(op.key())
            .is_some_and(|current| Arc::ptr_eq(current, op))
        {
            in_flight.remove(op.key());
        }
    }
}

/// Invoke each completion with a clone of `result`. A panicking completion
/// is logged and does not stop the others.
fn deliver(key: &str, completions: Vec<Completion>, result: &Result<Download, FetchError>) {
    for completion in completions {
        let result = result.clone();
        if std::panic::catch_unwind(AssertUnwindSafe(move || completion(result))).is_err() {
            warn!(key = %key, "Download completion panicked");
        }
    }
}
