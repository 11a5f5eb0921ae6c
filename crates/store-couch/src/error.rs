//! HTTP error classification.
//!
//! Every failure of a document request is reduced to a [`CouchError`] and then
//! mapped onto [`StoreError`]. The status-to-variant mapping is the one the
//! retry policy depends on:
//!
//! | Response | `StoreError` |
//! |----------|--------------|
//! | 409 | `Conflict` (stale revision, retried) |
//! | 5xx, transport fault | `Connection` (retried on write paths) |
//! | request timeout | `Timeout` |
//! | other non-2xx | `Backend` with the status |

use std::sync::Arc;

use kvbridge_store::{BoxError, StoreError};
use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Result type alias for document requests.
pub type CouchResult<T> = std::result::Result<T, CouchError>;

/// Errors raised while talking to the document server.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CouchError {
    /// The server answered with a status the operation does not expect.
    #[error("HTTP {status} ({method} {path})")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Request method.
        method: Method,
        /// Request path, percent-encoded.
        path: String,
    },

    /// The request timed out.
    #[error("request timed out: {message}")]
    Timeout {
        /// Transport message.
        message: String,
    },

    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport {
        /// Transport message.
        message: String,
        /// The underlying client error.
        #[source]
        source: Option<BoxError>,
    },

    /// A response body was not the JSON document expected.
    #[error("malformed response: {message}")]
    Decode {
        /// What was wrong.
        message: String,
    },
}

impl CouchError {
    /// Creates a `Status` error for the request that produced `status`.
    #[must_use]
    pub fn status(status: StatusCode, method: Method, url: &url::Url) -> Self {
        Self::Status { status, method, path: url.path().to_owned() }
    }

    /// Creates a `Decode` error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }
}

impl From<reqwest::Error> for CouchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout { message: err.to_string() };
        }
        if err.is_decode() {
            return Self::Decode { message: err.to_string() };
        }
        Self::Transport { message: err.to_string(), source: Some(Arc::new(err)) }
    }
}

impl From<CouchError> for StoreError {
    fn from(err: CouchError) -> Self {
        match err {
            CouchError::Status { status, method, path } => {
                let message = format!("HTTP {status} ({method} {path})");
                if status == StatusCode::CONFLICT {
                    StoreError::conflict(message)
                } else if status.is_server_error() {
                    StoreError::connection(message)
                } else {
                    StoreError::backend_status(status.as_u16(), message)
                }
            },
            CouchError::Timeout { message } => StoreError::timeout(message),
            CouchError::Transport { message, source } => StoreError::Connection { message, source },
            CouchError::Decode { message } => StoreError::serialization(message),
        }
    }
}
