//! Request/response boundary between the download coordinator and the
//! network.
//!
//! The coordinator only sees the [`Transport`] trait, which lets tests
//! substitute [`StubTransport`] for the real [`HttpTransport`].
//!
//! The trait returns `Pin<Box<dyn Future>>` rather than using `async fn` so
//! it stays dyn-compatible and the coordinator can hold an
//! `Arc<dyn Transport>`.

mod http;
mod stub;

pub use http::HttpTransport;
pub use stub::StubTransport;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transport-level failures.
///
/// Cloneable so one failure can be delivered to every caller waiting on the
/// same operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Could not connect to the host.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The operation ran out of time.
    #[error("Request timed out")]
    Timeout,

    /// The response body could not be read.
    #[error("Failed to read response body: {0}")]
    Body(String),

    /// Any other request failure.
    #[error("Request failed: {0}")]
    Request(String),
}

/// An outgoing GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend(headers.iter().cloned());
        self
    }
}

/// A completed response; the status has not been checked yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is a client or server error (400 and above).
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// Sends requests on behalf of the download coordinator.
pub trait Transport: Send + Sync {
    /// Perform one request. No retries.
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_appended() {
        let headers = vec![("X-One".to_string(), "1".to_string())];
        let request = TransportRequest::get("https://example.com").with_headers(&headers);
        assert_eq!(request.url, "https://example.com");
        assert_eq!(request.headers, headers);
    }

    #[test]
    fn test_response_error_threshold() {
        assert!(!TransportResponse::new(200, Bytes::new()).is_error());
        assert!(!TransportResponse::new(304, Bytes::new()).is_error());
        assert!(TransportResponse::new(400, Bytes::new()).is_error());
        assert!(TransportResponse::new(503, Bytes::new()).is_error());
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Timeout.to_string(), "Request timed out");
        assert_eq!(
            TransportError::Connect("refused".into()).to_string(),
            "Connection failed: refused"
        );
    }
}
