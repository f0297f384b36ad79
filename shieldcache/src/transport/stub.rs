//! In-process transport that answers from a route table.
//!
//! Used by tests and offline setups. Besides canned responses it records
//! how often each URL was requested and whether two requests for the same
//! URL were ever active at once, which is what coalescing tests assert on.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use super::{BoxFuture, Transport, TransportError, TransportRequest, TransportResponse};

#[derive(Clone)]
enum Route {
    Respond {
        status: u16,
        body: Bytes,
        delay: Option<Duration>,
    },
    Fail(TransportError),
    Hang,
}

struct StubState {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<HashMap<String, usize>>,
    active: Mutex<HashMap<String, usize>>,
    history: Mutex<Vec<TransportRequest>>,
    overlaps: AtomicUsize,
    paused: watch::Sender<bool>,
}

/// Route-table transport.
///
/// Cloning shares the routes and the recorded history. URLs without a
/// route answer `404` with an empty body.
#[derive(Clone)]
pub struct StubTransport {
    state: Arc<StubState>,
}

impl StubTransport {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Arc::new(StubState {
                routes: Mutex::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                history: Mutex::new(Vec::new()),
                overlaps: AtomicUsize::new(0),
                paused,
            }),
        }
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        self.route(
            url,
            Route::Respond {
                status,
                body: body.into(),
                delay: None,
            },
        )
    }

    /// Answer `url` after sleeping for `delay`.
    pub fn respond_after(&self, url: &str, delay: Duration, status: u16, body: impl Into<Bytes>) -> &Self {
        self.route(
            url,
            Route::Respond {
                status,
                body: body.into(),
                delay: Some(delay),
            },
        )
    }

    /// Fail every request for `url` with `error`.
    pub fn fail(&self, url: &str, error: TransportError) -> &Self {
        self.route(url, Route::Fail(error))
    }

    /// Never answer requests for `url`.
    pub fn hang(&self, url: &str) -> &Self {
        self.route(url, Route::Hang)
    }

    fn route(&self, url: &str, route: Route) -> &Self {
        self.state.routes.lock().insert(url.to_string(), route);
        self
    }

    /// Hold all responses until [`resume`](Self::resume).
    ///
    /// Requests are still counted while paused.
    pub fn pause(&self) {
        self.state.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.state.paused.send_replace(false);
    }

    /// Number of requests made for `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.state.requests.lock().get(url).copied().unwrap_or(0)
    }

    /// Number of requests made for any URL.
    pub fn total_requests(&self) -> usize {
        self.state.requests.lock().values().sum()
    }

    /// Requests currently awaiting a response for `url`.
    pub fn active_count(&self, url: &str) -> usize {
        self.state.active.lock().get(url).copied().unwrap_or(0)
    }

    /// How many times a request started while another request for the same
    /// URL was still active.
    pub fn overlap_count(&self) -> usize {
        self.state.overlaps.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn history(&self) -> Vec<TransportRequest> {
        self.state.history.lock().clone()
    }
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StubTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubTransport")
            .field("routes", &self.state.routes.lock().len())
            .field("requests", &self.total_requests())
            .finish()
    }
}

/// Marks a request active for as long as it lives, including when the
/// request future is dropped early.
struct ActiveGuard<'a> {
    state: &'a StubState,
    url: String,
}

impl<'a> ActiveGuard<'a> {
    fn enter(state: &'a StubState, url: &str) -> Self {
        let mut active = state.active.lock();
        let count = active.entry(url.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            state.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        Self {
            state,
            url: url.to_string(),
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.state.active.lock();
        if let Some(count) = active.get_mut(&self.url) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(&self.url);
            }
        }
    }
}

impl Transport for StubTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let state = &*self.state;
            *state.requests.lock().entry(request.url.clone()).or_insert(0) += 1;
            state.history.lock().push(request.clone());
            let _active = ActiveGuard::enter(state, &request.url);
            trace!(url = %request.url, "Stub request received");

            let mut paused = state.paused.subscribe();
            // The sender lives in `state`, so this only fails if the stub is gone.
            let _ = paused.wait_for(|paused| !*paused).await;

            let route = state.routes.lock().get(&request.url).cloned();
            match route {
                Some(Route::Respond { status, body, delay }) => {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(TransportResponse { status, body })
                }
                Some(Route::Fail(error)) => Err(error),
                Some(Route::Hang) => std::future::pending::<Result<TransportResponse, TransportError>>().await,
                None => Ok(TransportResponse::new(404, Bytes::new())),
            }
        })
    }
}
