//! Error types for the ORM adapter's connection registry.

use kvbridge_store::{ConfigError, StoreError};
use kvbridge_store_sql::SqlError;
use thiserror::Error;

/// Result type alias for registry operations.
pub type OrmResult<T> = std::result::Result<T, OrmError>;

/// Errors raised while resolving a connection for an [`OrmStore`](crate::OrmStore).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum OrmError {
    /// No configuration is registered under this name.
    #[error("no connection configuration named {name:?}")]
    UnknownConnection {
        /// The requested name.
        name: String,
    },

    /// No pool is registered as the default.
    #[error("no default connection pool is registered")]
    NoDefaultConnection,

    /// No driver can open connections for this adapter.
    #[error("no driver for adapter {adapter:?}")]
    UnsupportedAdapter {
        /// The adapter named in the specification.
        adapter: String,
    },

    /// A connection URL could not be parsed.
    #[error("invalid connection url: {message}")]
    InvalidUrl {
        /// Parser message.
        message: String,
    },

    /// The store configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The driver failed.
    #[error(transparent)]
    Sql(#[from] SqlError),
}

impl From<OrmError> for StoreError {
    fn from(err: OrmError) -> Self {
        match err {
            OrmError::Sql(err) => err.into(),
            other => StoreError::connection(other.to_string()),
        }
    }
}
