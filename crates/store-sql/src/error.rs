//! Error types for the SQL connection layer.
//!
//! Driver errors are classified once, here, into the handful of cases the
//! adapters branch on (uniqueness violations, lock contention) and mapped
//! onto [`StoreError`] for callers.

use std::{sync::Arc, time::Duration};

use kvbridge_store::{BoxError, StoreError};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type alias for SQL connection operations.
pub type SqlResult<T> = std::result::Result<T, SqlError>;

/// Errors raised by [`SqlConnection`](crate::SqlConnection) and
/// [`ConnectionPool`](crate::ConnectionPool) implementations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SqlError {
    /// A unique or primary-key constraint rejected the write.
    #[error("unique constraint violated: {message}")]
    UniqueViolation {
        /// Driver message.
        message: String,
    },

    /// The database was busy or locked past the busy timeout.
    #[error("database busy: {message}")]
    Busy {
        /// Driver message.
        message: String,
    },

    /// No pooled connection became available in time.
    #[error("timed out after {waited:?} waiting for a pooled connection")]
    PoolTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The pool was disconnected.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A column held a type the codec cannot read.
    #[error("unexpected column type: {message}")]
    Decode {
        /// What was found.
        message: String,
    },

    /// Any other database failure.
    #[error("database error: {message}")]
    Database {
        /// Driver message.
        message: String,
        /// The underlying driver error.
        #[source]
        source: Option<BoxError>,
    },
}

impl SqlError {
    /// Creates a `Database` error without a driver source.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into(), source: None }
    }

    /// Returns `true` for uniqueness violations.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

impl From<rusqlite::Error> for SqlError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::ConstraintViolation
                    if matches!(
                        failure.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
                {
                    return Self::UniqueViolation { message };
                },
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::Busy { message };
                },
                _ => {},
            }
        }
        if let rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) =
            &err
        {
            return Self::Decode { message: err.to_string() };
        }
        Self::Database { message: err.to_string(), source: Some(Arc::new(err)) }
    }
}

impl From<SqlError> for StoreError {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::UniqueViolation { message } => StoreError::conflict(message),
            SqlError::Busy { message } => StoreError::timeout(message),
            SqlError::PoolTimeout { waited } => {
                tracing::warn!(waited_ms = waited.as_millis() as u64, "pool acquire timed out");
                StoreError::timeout(format!("no pooled connection within {waited:?}"))
            },
            SqlError::PoolClosed => StoreError::connection("connection pool is closed"),
            SqlError::Decode { message } => StoreError::serialization(message),
            SqlError::Database { message, source: Some(source) } => {
                StoreError::Backend { message, status: None, source: Some(source) }
            },
            SqlError::Database { message, source: None } => StoreError::backend(message),
        }
    }
}
