//! HTTP transport using an async reqwest client.

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{BoxFuture, Transport, TransportError, TransportRequest, TransportResponse};
use crate::config::DownloaderConfig;

/// Real network transport.
///
/// The client carries no overall timeout; the download coordinator bounds
/// each operation instead. Connecting is bounded by the same duration.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport from the downloader configuration.
    pub fn new(config: &DownloaderConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            // Shields and sprites come from a handful of hosts
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn classify(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            trace!(url = %request.url, "HTTP GET request starting");

            let mut builder = self.client.get(&request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = match builder.send().await {
                Ok(resp) => {
                    debug!(
                        url = %request.url,
                        status = resp.status().as_u16(),
                        "HTTP response received"
                    );
                    resp
                }
                Err(e) => {
                    warn!(
                        url = %request.url,
                        error = %e,
                        is_connect = e.is_connect(),
                        is_timeout = e.is_timeout(),
                        is_request = e.is_request(),
                        "HTTP request failed"
                    );
                    return Err(classify(&e));
                }
            };

            let status = response.status().as_u16();
            match response.bytes().await {
                Ok(body) => {
                    trace!(url = %request.url, bytes = body.len(), "HTTP response body read");
                    Ok(TransportResponse { status, body })
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Failed to read response body");
                    Err(TransportError::Body(e.to_string()))
                }
            }
        })
    }
}
