//! SQLite driver: a [`SqlConnection`] over `rusqlite` and a bounded pool.
//!
//! # Pooling
//!
//! [`SqlitePool`] keeps up to `max_connections` connections, reusing idle
//! ones and blocking callers (up to `acquire_timeout`) when all are in use.
//! An in-memory database lives inside its single connection, so in-memory
//! pools are capped at one connection and never drop it until
//! [`disconnect`](ConnectionPool::disconnect).
//!
//! # Locking
//!
//! SQLite has no row locks. Transactions open with `BEGIN IMMEDIATE`, which
//! takes the database write lock up front, so a `SELECT` inside one is as
//! good as `SELECT ... FOR UPDATE`.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use rusqlite::{
    Connection, OpenFlags, params_from_iter,
    types::{ToSqlOutput, Value, ValueRef},
};
use serde::{Deserialize, Serialize};

use crate::{
    connection::{DatabaseKind, SqlConnection, SqlValue},
    error::{SqlError, SqlResult},
    pool::ConnectionPool,
};

/// Default number of pooled connections for file databases.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Default wait for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Write-ahead log; readers do not block the writer.
    #[default]
    Wal,
    /// Rollback journal.
    Delete,
}

impl JournalMode {
    const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Options for [`SqlitePool`].
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// Database file. `None` opens a private in-memory database.
    #[builder(into)]
    pub path: Option<PathBuf>,

    /// Upper bound on open connections. Forced to 1 for in-memory databases.
    #[serde(default = "default_max_connections")]
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// How long `acquire` waits for a free connection.
    #[serde(with = "humantime_serde", default = "default_acquire_timeout")]
    #[builder(default = DEFAULT_ACQUIRE_TIMEOUT)]
    pub acquire_timeout: Duration,

    /// How long a statement waits on a locked database before failing.
    #[serde(with = "humantime_serde", default = "default_busy_timeout")]
    #[builder(default = DEFAULT_BUSY_TIMEOUT)]
    pub busy_timeout: Duration,

    /// Journal mode for file databases.
    #[serde(default)]
    #[builder(default)]
    pub journal_mode: JournalMode,
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout() -> Duration {
    DEFAULT_ACQUIRE_TIMEOUT
}

fn default_busy_timeout() -> Duration {
    DEFAULT_BUSY_TIMEOUT
}

impl SqliteConfig {
    /// Configuration for a file database with defaults.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::builder().path(path.into()).build()
    }

    /// Configuration for a private in-memory database.
    #[must_use]
    pub fn memory() -> Self {
        Self::builder().build()
    }

    /// Checks the numeric limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](kvbridge_store::ConfigError) when
    /// `max_connections` is zero.
    pub fn validate(&self) -> Result<(), kvbridge_store::ConfigError> {
        if self.max_connections == 0 {
            return Err(kvbridge_store::ConfigError::BelowMinimum {
                field: "max_connections",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    fn effective_max_connections(&self) -> usize {
        if self.path.is_some() { self.max_connections.max(1) } else { 1 }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Connection
// ───────────────────────────────────────────────────────────────────────────

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            Self::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Self::Blob(raw) => ToSqlOutput::Borrowed(ValueRef::Blob(raw)),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(n) => SqlValue::Integer(n),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(text) => SqlValue::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(raw) => SqlValue::Blob(raw.to_vec()),
    }
}

/// A single `rusqlite` connection.
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Opens `path` (or a private in-memory database) and applies pragmas.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError`] if the file cannot be opened or a pragma fails.
    pub fn open(config: &SqliteConfig) -> SqlResult<Self> {
        let conn = match &config.path {
            Some(path) => Self::open_file(path, config)?,
            None => {
                let conn = Connection::open_in_memory()?;
                conn.busy_timeout(config.busy_timeout)?;
                conn
            },
        };
        Ok(Self { conn })
    }

    fn open_file(path: &Path, config: &SqliteConfig) -> SqlResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
        Ok(conn)
    }

    fn params(params: &[SqlValue]) -> impl rusqlite::Params + '_ {
        params_from_iter(params.iter())
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .field("autocommit", &self.conn.is_autocommit())
            .finish()
    }
}

impl SqlConnection for SqliteConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize> {
        tracing::trace!(sql, params = params.len(), "execute");
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(Self::params(params))?)
    }

    fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Option<SqlValue>> {
        tracing::trace!(sql, params = params.len(), "query scalar");
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(Self::params(params))?;
        match rows.next()? {
            Some(row) => Ok(Some(read_value(row.get_ref(0)?))),
            None => Ok(None),
        }
    }

    fn query_column(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<SqlValue>> {
        tracing::trace!(sql, params = params.len(), "query column");
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(Self::params(params))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(read_value(row.get_ref(0)?));
        }
        Ok(values)
    }

    fn execute_batch(&mut self, sql: &str) -> SqlResult<()> {
        tracing::trace!(sql, "execute batch");
        Ok(self.conn.execute_batch(sql)?)
    }

    fn table_exists(&mut self, table: &str) -> SqlResult<bool> {
        let found = self.query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[SqlValue::from(table)],
        )?;
        Ok(found.is_some())
    }

    fn begin_statement(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }

    fn row_lock_clause(&self) -> &'static str {
        ""
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Pool
// ───────────────────────────────────────────────────────────────────────────

struct PoolState {
    idle: Vec<SqliteConnection>,
    open: usize,
    closed: bool,
}

struct PoolInner {
    config: SqliteConfig,
    max_connections: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn release(&self, conn: SqliteConnection) {
        let mut state = self.state.lock();
        if state.closed || (!conn.conn.is_autocommit() && !Self::reset(&conn)) {
            state.open = state.open.saturating_sub(1);
        } else {
            state.idle.push(conn);
        }
        drop(state);
        self.available.notify_one();
    }

    fn reset(conn: &SqliteConnection) -> bool {
        tracing::warn!("connection returned inside a transaction; rolling back");
        conn.conn.execute_batch("ROLLBACK").is_ok()
    }
}

/// Bounded pool of [`SqliteConnection`]s.
///
/// Cheaply cloneable; clones share the same connections.
///
/// ```
/// use kvbridge_store_sql::{ConnectionPool, SqlitePool, SqliteConfig};
///
/// let pool = SqlitePool::open(SqliteConfig::memory()).unwrap();
/// let mut conn = pool.acquire().unwrap();
/// conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
/// ```
#[derive(Clone)]
pub struct SqlitePool {
    inner: Arc<PoolInner>,
}

impl SqlitePool {
    /// Creates a pool and opens its first connection eagerly so bad paths
    /// fail here rather than on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError`] if the configuration is invalid or the database
    /// cannot be opened.
    pub fn open(config: SqliteConfig) -> SqlResult<Self> {
        config.validate().map_err(|err| SqlError::database(err.to_string()))?;
        let first = SqliteConnection::open(&config)?;
        let max_connections = config.effective_max_connections();
        let inner = PoolInner {
            config,
            max_connections,
            state: Mutex::new(PoolState { idle: vec![first], open: 1, closed: false }),
            available: Condvar::new(),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError`] if SQLite cannot allocate the database.
    pub fn memory() -> SqlResult<Self> {
        Self::open(SqliteConfig::memory())
    }

    /// The configuration this pool was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.inner.config
    }

    /// Connections currently open (idle or checked out).
    pub fn open_connections(&self) -> usize {
        self.inner.state.lock().open
    }
}

impl fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SqlitePool")
            .field("path", &self.inner.config.path)
            .field("open", &state.open)
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool for SqlitePool {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn acquire(&self) -> SqlResult<Box<dyn SqlConnection>> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(SqlError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(Box::new(PooledConnection::new(conn, &self.inner)));
            }
            if state.open < self.inner.max_connections {
                state.open += 1;
                drop(state);
                return match SqliteConnection::open(&self.inner.config) {
                    Ok(conn) => Ok(Box::new(PooledConnection::new(conn, &self.inner))),
                    Err(err) => {
                        self.inner.state.lock().open -= 1;
                        self.inner.available.notify_one();
                        Err(err)
                    },
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SqlError::PoolTimeout { waited: timeout });
            }
            self.inner.available.wait_for(&mut state, deadline - now);
        }
    }

    fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let idle = state.idle.len();
        state.open -= idle;
        state.idle.clear();
        drop(state);
        self.inner.available.notify_all();
        tracing::debug!(closed_idle = idle, "sqlite pool disconnected");
    }

    fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

/// A connection checked out of a [`SqlitePool`]; returns itself on drop.
struct PooledConnection {
    conn: Option<SqliteConnection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn new(conn: SqliteConnection, pool: &Arc<PoolInner>) -> Self {
        Self { conn: Some(conn), pool: Arc::clone(pool) }
    }

    fn conn(&mut self) -> SqlResult<&mut SqliteConnection> {
        self.conn.as_mut().ok_or(SqlError::PoolClosed)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl SqlConnection for PooledConnection {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize> {
        self.conn()?.execute(sql, params)
    }

    fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Option<SqlValue>> {
        self.conn()?.query_scalar(sql, params)
    }

    fn query_column(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<SqlValue>> {
        self.conn()?.query_column(sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> SqlResult<()> {
        self.conn()?.execute_batch(sql)
    }

    fn table_exists(&mut self, table: &str) -> SqlResult<bool> {
        self.conn()?.table_exists(table)
    }

    fn begin_statement(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }

    fn row_lock_clause(&self) -> &'static str {
        ""
    }
}
