//! Connection collaborator.
//!
//! [`SqlConnection`] is the narrow surface the adapters need from a database
//! driver: run a statement, read a scalar or a column, and a few
//! driver-specific primitives for transactions and row locking. Everything
//! above it (dialects, the ORM relation builder) is driver-agnostic.

use std::fmt;

use bytes::Bytes;

use crate::error::{SqlError, SqlResult};

/// The database product behind a connection, used to pick a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// SQLite.
    Sqlite,
    /// PostgreSQL.
    Postgres,
    /// MySQL or MariaDB.
    Mysql,
    /// Anything else; gets the generic strategy.
    Other,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Other => "other",
        })
    }
}

/// A bound parameter or a fetched column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// Text.
    Text(String),
    /// Binary.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Reads the value as an integer, accepting integral text and blobs.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::Decode`] for anything that is not an integer.
    pub fn as_integer(&self) -> SqlResult<i64> {
        let parsed = match self {
            Self::Integer(n) => Some(*n),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Blob(raw) => std::str::from_utf8(raw).ok().and_then(|t| t.trim().parse().ok()),
            Self::Real(_) | Self::Null => None,
        };
        parsed.ok_or_else(|| SqlError::Decode { message: format!("expected an integer, got {self:?}") })
    }

    /// Converts a fetched column into the bytes callers see. Numbers become
    /// decimal text and `NULL` becomes empty.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Null => Bytes::new(),
            Self::Integer(n) => Bytes::from(n.to_string()),
            Self::Real(f) => Bytes::from(f.to_string()),
            Self::Text(text) => Bytes::from(text),
            Self::Blob(raw) => Bytes::from(raw),
        }
    }
}

impl From<&[u8]> for SqlValue {
    fn from(raw: &[u8]) -> Self {
        Self::Blob(raw.to_vec())
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<&str> for SqlValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// A single database connection.
///
/// Implementations are driven from blocking threads; they are `Send` but not
/// shared.
pub trait SqlConnection: Send {
    /// The database product behind this connection.
    fn kind(&self) -> DatabaseKind;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize>;

    /// Returns the first column of the first row, or `None` when no row
    /// matched.
    fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Option<SqlValue>>;

    /// Returns the first column of every row.
    fn query_column(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<SqlValue>>;

    /// Runs one or more parameterless statements.
    fn execute_batch(&mut self, sql: &str) -> SqlResult<()>;

    /// Returns `true` if `table` exists.
    fn table_exists(&mut self, table: &str) -> SqlResult<bool>;

    /// Statement that opens a transaction which takes write locks eagerly.
    fn begin_statement(&self) -> &'static str {
        "BEGIN"
    }

    /// Clause appended to a `SELECT` to lock the selected rows until the
    /// transaction ends. Empty when the driver locks at `BEGIN` instead.
    fn row_lock_clause(&self) -> &'static str {
        " FOR UPDATE"
    }
}

/// Runs `body` inside a transaction.
///
/// Commits when `body` succeeds; rolls back and returns the original error
/// otherwise. A failed rollback is logged, not returned.
///
/// # Errors
///
/// Returns the error from `BEGIN`, from `body`, or from `COMMIT`.
pub fn transaction<T, E>(
    conn: &mut dyn SqlConnection,
    body: impl FnOnce(&mut dyn SqlConnection) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<SqlError> + fmt::Display,
{
    let begin = conn.begin_statement();
    conn.execute_batch(begin)?;
    match body(&mut *conn) {
        Ok(value) => match conn.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(err) => {
                rollback(conn);
                Err(err.into())
            },
        },
        Err(err) => {
            tracing::trace!(error = %err, "rolling back");
            rollback(conn);
            Err(err)
        },
    }
}

fn rollback(conn: &mut dyn SqlConnection) {
    if let Err(err) = conn.execute_batch("ROLLBACK") {
        tracing::warn!(error = %err, "rollback failed");
    }
}
