//! Integration tests for the Download Coordinator.
//!
//! These tests drive the coordinator through `StubTransport` and verify:
//! - concurrent requests for one key share a single transport call
//! - concurrent requests for distinct keys stay independent
//! - cancellation, timeouts and error classification reach every caller
//!
//! Run with: `cargo test --test download_coordinator`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use tokio::runtime::Handle;

use shieldcache::config::DownloaderConfig;
use shieldcache::download::{DownloadCoordinator, FetchError};
use shieldcache::transport::{StubTransport, TransportError};

const SHIELD_URL: &str = "https://shields.test/us-101@2x.png";

// ============================================================================
// Helper Functions
// ============================================================================

fn coordinator(stub: &StubTransport, timeout: Duration) -> Arc<DownloadCoordinator> {
    Arc::new(DownloadCoordinator::new(
        Arc::new(stub.clone()),
        DownloaderConfig::default().with_request_timeout(timeout),
        Handle::current(),
    ))
}

/// Poll `condition` until it holds, failing the test after five seconds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_callers_share_one_transport_call() {
    let stub = StubTransport::new();
    stub.respond(SHIELD_URL, 200, &b"shield"[..]);
    stub.pause();
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.fetch_async(SHIELD_URL).await })
        })
        .collect();

    wait_until(|| coordinator.stats().total_requests == 100).await;
    assert_eq!(coordinator.in_flight_count(), 1);
    stub.resume();

    for result in join_all(tasks).await {
        let download = result.unwrap().unwrap();
        assert_eq!(download.data, Bytes::from_static(b"shield"));
    }

    assert_eq!(stub.request_count(SHIELD_URL), 1);
    assert_eq!(stub.overlap_count(), 0);
    let stats = coordinator.stats();
    assert_eq!(stats.started, 1);
    assert_eq!(stats.coalesced_requests, 99);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callers_on_plain_threads_coalesce() {
    let stub = StubTransport::new();
    stub.respond(SHIELD_URL, 200, &b"shield"[..]);
    stub.pause();
    let coordinator = coordinator(&stub, Duration::from_secs(5));
    let delivered = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let delivered = Arc::clone(&delivered);
            std::thread::spawn(move || {
                coordinator.fetch(SHIELD_URL, move |result| {
                    assert!(result.is_ok());
                    delivered.fetch_add(1, Ordering::SeqCst);
                });
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    stub.resume();
    wait_until(|| delivered.load(Ordering::SeqCst) == 16).await;
    assert_eq!(stub.request_count(SHIELD_URL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_distinct_keys_get_distinct_results() {
    let stub = StubTransport::new();
    let urls: Vec<String> = (0..100)
        .map(|i| format!("https://shields.test/route-{}@2x.png", i))
        .collect();
    for (i, url) in urls.iter().enumerate() {
        stub.respond(url, 200, format!("payload-{}", i).into_bytes());
    }
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    let tasks: Vec<_> = urls
        .iter()
        .cloned()
        .map(|url| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.fetch_async(&url).await })
        })
        .collect();

    let results = join_all(tasks).await;
    for (i, result) in results.into_iter().enumerate() {
        let download = result.unwrap().unwrap();
        assert_eq!(download.key, urls[i]);
        assert_eq!(download.data, Bytes::from(format!("payload-{}", i)));
    }
    assert_eq!(stub.total_requests(), 100);
}

#[tokio::test]
async fn test_completions_run_in_registration_order() {
    let stub = StubTransport::new();
    stub.respond(SHIELD_URL, 200, &b"shield"[..]);
    stub.pause();
    let coordinator = coordinator(&stub, Duration::from_secs(5));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for i in 0..5 {
        let order = Arc::clone(&order);
        coordinator.fetch(SHIELD_URL, move |_| order.lock().push(i));
    }
    stub.resume();

    wait_until(|| order.lock().len() == 5).await;
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_reaches_every_caller_once() {
    let stub = StubTransport::new();
    stub.hang(SHIELD_URL);
    let coordinator = coordinator(&stub, Duration::from_secs(5));
    let cancelled = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let cancelled = Arc::clone(&cancelled);
            coordinator.fetch(SHIELD_URL, move |result| {
                assert!(result.unwrap_err().is_cancelled());
                cancelled.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    assert!(coordinator.cancel(SHIELD_URL));
    assert_eq!(cancelled.load(Ordering::SeqCst), 3);

    for handle in &handles {
        assert!(handle.is_cancelled());
        assert!(handle.is_finished());
        assert!(!handle.is_executing());
        assert!(!handle.is_ready());
    }

    // A second cancel is a no-op and nothing is delivered twice.
    assert!(!coordinator.cancel(SHIELD_URL));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cancelled.load(Ordering::SeqCst), 3);
    wait_until(|| stub.active_count(SHIELD_URL) == 0).await;
}

#[tokio::test]
async fn test_cancelled_operation_never_delivers_success() {
    let stub = StubTransport::new();
    stub.respond(SHIELD_URL, 200, &b"shield"[..]);
    stub.pause();
    let coordinator = coordinator(&stub, Duration::from_secs(5));
    let outcomes = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let sink = Arc::clone(&outcomes);
    let handle = coordinator.fetch(SHIELD_URL, move |result| sink.lock().push(result));
    assert!(handle.cancel());

    // Let the transport answer; the answer must be discarded.
    stub.resume();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].as_ref().unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_fetch_after_cancel_starts_new_operation() {
    let stub = StubTransport::new();
    stub.respond(SHIELD_URL, 200, &b"shield"[..]);
    stub.pause();
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    let first = coordinator.fetch(SHIELD_URL, |_| {});
    coordinator.cancel(SHIELD_URL);
    stub.resume();

    let download = coordinator.fetch_async(SHIELD_URL).await.unwrap();
    assert_eq!(download.data, Bytes::from_static(b"shield"));
    assert!(first.is_cancelled());
    assert_eq!(coordinator.stats().started, 2);
}

#[tokio::test]
async fn test_cancel_all() {
    let stub = StubTransport::new();
    stub.hang("https://shields.test/a.png");
    stub.hang("https://shields.test/b.png");
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    let a = coordinator.fetch("https://shields.test/a.png", |_| {});
    let b = coordinator.fetch("https://shields.test/b.png", |_| {});

    assert_eq!(coordinator.cancel_all(), 2);
    assert_eq!(coordinator.in_flight_count(), 0);
    assert!(a.is_cancelled() && b.is_cancelled());
    assert_eq!(coordinator.stats().cancelled, 2);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_timeout_fans_out_to_all_callers() {
    let stub = StubTransport::new();
    stub.hang(SHIELD_URL);
    let coordinator = coordinator(&stub, Duration::from_millis(50));

    let results = join_all((0..5).map(|_| coordinator.fetch_async(SHIELD_URL))).await;

    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {:?}", err);
    }
    assert_eq!(stub.request_count(SHIELD_URL), 1);
}

#[tokio::test]
async fn test_not_found_is_server_error() {
    let stub = StubTransport::new();
    stub.respond(SHIELD_URL, 404, Bytes::new());
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    let err = coordinator.fetch_async(SHIELD_URL).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Server {
            url: SHIELD_URL.to_string(),
            status: 404
        }
    );
}

#[tokio::test]
async fn test_transport_failure_is_distinct_from_server_error() {
    let stub = StubTransport::new();
    stub.fail(SHIELD_URL, TransportError::Connect("dns failure".into()));
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    let err = coordinator.fetch_async(SHIELD_URL).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::Transport {
            source: TransportError::Connect(_),
            ..
        }
    ));
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn test_missing_local_file_is_local_error() {
    let stub = StubTransport::new();
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    let err = coordinator
        .fetch_async("file:///nonexistent/shieldcache/sprite.png")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::LocalResource { .. }));

    let err = coordinator.fetch_async("mailto:someone@example.com").await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidKey { .. }));
    assert_eq!(stub.total_requests(), 0);
}

#[tokio::test]
async fn test_failed_operation_leaves_map() {
    let stub = StubTransport::new();
    stub.respond(SHIELD_URL, 500, Bytes::new());
    let coordinator = coordinator(&stub, Duration::from_secs(5));

    assert!(coordinator.fetch_async(SHIELD_URL).await.is_err());
    assert!(!coordinator.is_in_flight(SHIELD_URL));

    // No retry happened, and a new fetch goes back to the network.
    assert!(coordinator.fetch_async(SHIELD_URL).await.is_err());
    assert_eq!(stub.request_count(SHIELD_URL), 2);
}
