//! Connection pool collaborator.

use std::{fmt, sync::Arc};

use crate::{
    connection::{DatabaseKind, SqlConnection},
    error::SqlResult,
};

/// Hands out connections to one database.
///
/// `acquire` blocks; adapters call it from `spawn_blocking`. Dropping the
/// returned connection gives it back.
pub trait ConnectionPool: Send + Sync + fmt::Debug {
    /// The database product behind the pool.
    fn kind(&self) -> DatabaseKind;

    /// Checks out a connection, waiting for one to free up if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::PoolTimeout`](crate::SqlError::PoolTimeout) when
    /// none frees up in time and
    /// [`SqlError::PoolClosed`](crate::SqlError::PoolClosed) after
    /// [`disconnect`](Self::disconnect).
    fn acquire(&self) -> SqlResult<Box<dyn SqlConnection>>;

    /// Closes idle connections and refuses further checkouts. Idempotent.
    fn disconnect(&self);

    /// Returns `true` after [`disconnect`](Self::disconnect).
    fn is_closed(&self) -> bool;
}

/// Shared, type-erased pool handle.
pub type SharedPool = Arc<dyn ConnectionPool>;
