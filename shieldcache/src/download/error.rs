//! Errors delivered to download callers.

use thiserror::Error;

use crate::transport::TransportError;

/// Why a fetch produced no data.
///
/// Every caller coalesced onto one operation receives a clone of the same
/// error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The transport failed, including timeouts.
    #[error("Transport error for {url}: {source}")]
    Transport { url: String, source: TransportError },

    /// The server answered with a status of 400 or above.
    #[error("HTTP {status} from {url}")]
    Server { url: String, status: u16 },

    /// The operation was cancelled before it finished.
    #[error("Download of {url} was cancelled")]
    Cancelled { url: String },

    /// The key is not a URL this coordinator can fetch.
    #[error("Invalid resource key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A `file://` key could not be read.
    #[error("Cannot read local resource {path}: {reason}")]
    LocalResource { path: String, reason: String },
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FetchError::Transport {
                source: TransportError::Timeout,
                ..
            }
        )
    }

    /// HTTP status for server errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
