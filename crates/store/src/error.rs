//! Store error types and result alias.
//!
//! Every adapter maps its driver or transport failures onto [`StoreError`].
//! Absence of a key is never an error: lookups return `Option`.
//!
//! # Error Types
//!
//! - [`StoreError::Conflict`] - a concurrent writer won a race; retryable
//! - [`StoreError::RetriesExhausted`] - the retry budget ran out, carries the last failure
//! - [`StoreError::TypeMismatch`] - `increment` hit a value that is not an integer
//! - [`StoreError::Connection`] - transport failure; transient
//! - [`StoreError::Timeout`] - lock wait or request timeout; transient
//! - [`StoreError::Backend`] - the backend rejected the request
//! - [`StoreError::Serialization`] - a value could not be encoded or decoded
//! - [`StoreError::InvalidKey`] - the key cannot be represented by the backend
//! - [`StoreError::Unsupported`] - the adapter does not declare the capability
//! - [`StoreError::Closed`] - the store was closed
//! - [`StoreError::Internal`] - anything else
//!
//! # Example
//!
//! ```
//! use kvbridge_store::{StoreError, StoreResult};
//!
//! fn parse(raw: &str) -> StoreResult<i64> {
//!     raw.parse().map_err(|_| StoreError::type_mismatch(format!("not an integer: {raw:?}")))
//! }
//!
//! assert!(parse("12").is_ok());
//! assert!(matches!(parse("twelve"), Err(StoreError::TypeMismatch { .. })));
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Errors preserve their source chain via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A concurrent writer changed the row or document between detection and
    /// recovery.
    ///
    /// Operations raising this are safe to re-run from the top; see
    /// [`with_conflict_retry`](crate::retry::with_conflict_retry).
    #[error("Write conflict: {message}")]
    Conflict {
        /// What collided.
        message: String,
    },

    /// The retry budget for an operation was exhausted.
    #[error("{operation} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Name of the operation that was retried.
        operation: &'static str,
        /// Total attempts made, including the first.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last: Box<StoreError>,
    },

    /// The stored value has the wrong type for the requested operation.
    #[error("Type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out, either waiting on a lock or on the network.
    #[error("Operation timeout: {message}")]
    Timeout {
        /// What timed out.
        message: String,
    },

    /// The backend rejected the request.
    #[error("Backend error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Backend {
        /// Description reported by the backend.
        message: String,
        /// Protocol status code, when the backend speaks one.
        status: Option<u16>,
        /// The underlying driver error.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// The key cannot be represented by this backend.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Why the key was rejected.
        message: String,
    },

    /// The adapter does not support this operation.
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Creates a new `RetriesExhausted` error wrapping the last failure.
    #[must_use]
    pub fn retries_exhausted(operation: &'static str, attempts: u32, last: StoreError) -> Self {
        Self::RetriesExhausted { operation, attempts, last: Box::new(last) }
    }

    /// Creates a new `TypeMismatch` error.
    #[must_use]
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch { message: message.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout { message: message.into() }
    }

    /// Creates a new `Backend` error without a status code.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), status: None, source: None }
    }

    /// Creates a new `Backend` error carrying a protocol status code.
    #[must_use]
    pub fn backend_status(status: u16, message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), status: Some(status), source: None }
    }

    /// Creates a new `Backend` error with a message and source error.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), status: None, source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey { message: message.into() }
    }

    /// Creates a new `Unsupported` error for the named operation.
    #[must_use]
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if this error signals a lost race that re-running the
    /// operation can resolve.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this error is likely to clear on its own: transport
    /// failures and timeouts.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The minimum accepted value.
        min: String,
        /// The value that was supplied.
        value: String,
    },

    /// A required field is missing or empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A field holds a value the component does not understand.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn conflict_is_conflict_not_transient() {
        let err = StoreError::conflict("row vanished");
        assert!(err.is_conflict());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Write conflict: row vanished");
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::connection("refused").is_transient());
        assert!(StoreError::timeout("lock wait").is_transient());
        assert!(!StoreError::type_mismatch("x").is_transient());
        assert!(!StoreError::backend_status(400, "bad request").is_transient());
        assert!(!StoreError::Closed.is_transient());
    }

    #[test]
    fn backend_display_includes_status() {
        assert_eq!(
            StoreError::backend_status(500, "boom").to_string(),
            "Backend error (500): boom"
        );
        assert_eq!(StoreError::backend("boom").to_string(), "Backend error: boom");
    }

    #[test]
    fn retries_exhausted_exposes_last_failure_as_source() {
        let err = StoreError::retries_exhausted("increment", 4, StoreError::conflict("lost"));
        assert_eq!(err.to_string(), "increment gave up after 4 attempts: Write conflict: lost");
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Write conflict: lost");
        assert!(!err.is_conflict());
    }

    #[test]
    fn source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::connection_with_source("dial failed", io);
        assert_eq!(err.source().unwrap().to_string(), "refused");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::BelowMinimum { field: "page_size", min: "1".into(), value: "0".into() };
        assert_eq!(err.to_string(), "page_size must be at least 1, got 0");
        assert_eq!(ConfigError::Empty { field: "table" }.to_string(), "table must not be empty");
    }
}
