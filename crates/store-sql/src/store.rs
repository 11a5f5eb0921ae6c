//! SQL-toolkit adapter.
//!
//! [`SqlStore`] keeps pairs in a two-column table `(k, v)` and delegates the
//! hard operations to its [`Dialect`]. Driver calls block, so each attempt
//! runs on the blocking pool with its own checked-out connection.
//!
//! | Operation | Strategy |
//! |-----------|----------|
//! | `create` | plain insert; uniqueness violation means `false` |
//! | `store` | dialect upsert, or update-then-insert retried on conflict |
//! | `increment` | dialect strategy retried on conflict |
//! | `delete` | locked read then delete, or `DELETE ... RETURNING` |
//! | `each_key` | keyset pagination over the primary key |

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use kvbridge_store::{
    Capabilities, KeyStream, KeyValueStore, StoreError, StoreResult, failed_key_stream,
    with_conflict_retry,
};
use parking_lot::RwLock;

use crate::{
    config::SqlStoreConfig,
    connection::{SqlConnection, SqlValue},
    dialect::{Dialect, DialectKind, Statements},
    pool::SharedPool,
    sqlite::{SqliteConfig, SqlitePool},
};

/// Key-value store over a SQL table.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use kvbridge_store::KeyValueStore;
/// use kvbridge_store_sql::{SqlStore, SqlStoreConfig, SqliteConfig};
///
/// # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
/// let store = SqlStore::sqlite(SqliteConfig::memory(), SqlStoreConfig::default()).await.unwrap();
///
/// assert_eq!(store.increment(b"hits", 3).await.unwrap(), 3);
/// assert_eq!(store.load(b"hits").await.unwrap(), Some(Bytes::from("3")));
/// store.close().await.unwrap();
/// # });
/// ```
pub struct SqlStore {
    pool: RwLock<Option<SharedPool>>,
    owns_pool: bool,
    dialect: Arc<dyn Dialect>,
    statements: Arc<Statements>,
    config: SqlStoreConfig,
}

impl SqlStore {
    /// Wraps a pool the caller keeps ownership of; [`close`](KeyValueStore::close)
    /// leaves it connected.
    ///
    /// Creates the table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be provisioned.
    pub async fn new(pool: SharedPool, config: SqlStoreConfig) -> StoreResult<Self> {
        Self::build(pool, config, false).await
    }

    /// Like [`new`](Self::new), but the store disconnects the pool on close.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be provisioned.
    pub async fn owning(pool: SharedPool, config: SqlStoreConfig) -> StoreResult<Self> {
        Self::build(pool, config, true).await
    }

    /// Opens a SQLite database and a store that owns its pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the table cannot
    /// be provisioned.
    pub async fn sqlite(sqlite: SqliteConfig, config: SqlStoreConfig) -> StoreResult<Self> {
        let pool = tokio::task::spawn_blocking(move || SqlitePool::open(sqlite))
            .await
            .map_err(join_error)??;
        Self::owning(Arc::new(pool), config).await
    }

    async fn build(pool: SharedPool, config: SqlStoreConfig, owns_pool: bool) -> StoreResult<Self> {
        config.validate().map_err(|err| StoreError::internal(err.to_string()))?;
        let dialect = config.dialect().unwrap_or_else(|| DialectKind::for_database(pool.kind())).build();
        let statements = Arc::new(Statements::new(dialect.as_ref(), config.table(), config.page_size()));

        let ddl = dialect.create_table_sql(config.table());
        let provision = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || provision.acquire()?.execute_batch(&ddl))
            .await
            .map_err(join_error)??;
        tracing::debug!(table = config.table(), dialect = dialect.name(), owns_pool, "sql store ready");

        Ok(Self { pool: RwLock::new(Some(pool)), owns_pool, dialect, statements, config })
    }

    /// The dialect in use.
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// The store's configuration.
    pub fn config(&self) -> &SqlStoreConfig {
        &self.config
    }

    fn pool(&self) -> StoreResult<SharedPool> {
        self.pool.read().clone().ok_or(StoreError::Closed)
    }

    /// Runs `op` on a pooled connection on the blocking thread pool.
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SqlConnection, &dyn Dialect, &Statements) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool()?;
        let dialect = Arc::clone(&self.dialect);
        let statements = Arc::clone(&self.statements);
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.acquire()?;
            op(conn.as_mut(), dialect.as_ref(), &statements)
        })
        .await
        .map_err(join_error)?
    }
}

impl fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlStore")
            .field("table", &self.config.table())
            .field("dialect", &self.dialect.name())
            .field("owns_pool", &self.owns_pool)
            .field("closed", &self.pool.read().is_none())
            .finish()
    }
}

fn join_error(err: tokio::task::JoinError) -> StoreError {
    StoreError::internal(format!("blocking database task failed: {err}"))
}

#[async_trait]
impl KeyValueStore for SqlStore {
    type Value = Bytes;

    const CAPABILITIES: Capabilities = Capabilities::ALL;

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        let key = SqlValue::from(key);
        self.run(move |conn, _, sql| Ok(conn.query_scalar(&sql.exists, &[key])?.is_some())).await
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn load(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        let key = SqlValue::from(key);
        self.run(move |conn, _, sql| {
            Ok(conn.query_scalar(&sql.load, &[key])?.map(SqlValue::into_bytes))
        })
        .await
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len(), value_len = value.len()))]
    async fn store(&self, key: &[u8], value: Bytes) -> StoreResult<Bytes> {
        let owned_key = Bytes::copy_from_slice(key);
        with_conflict_retry(&self.config.write_retry(), "store", || {
            let key = owned_key.clone();
            let value = value.clone();
            self.run(move |conn, dialect, sql| dialect.store(conn, sql, &key, &value))
        })
        .await?;
        Ok(value)
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        let key = key.to_vec();
        let prior = self.run(move |conn, dialect, sql| dialect.delete(conn, sql, &key)).await?;
        Ok(prior.map(SqlValue::into_bytes))
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len()))]
    async fn create(&self, key: &[u8], value: Bytes) -> StoreResult<bool> {
        let params = [SqlValue::from(key), SqlValue::from(value.as_ref())];
        self.run(move |conn, _, sql| match conn.execute(&sql.insert, &params) {
            Ok(_) => Ok(true),
            Err(err) if err.is_unique_violation() => Ok(false),
            Err(err) => Err(err.into()),
        })
        .await
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn increment(&self, key: &[u8], amount: i64) -> StoreResult<i64> {
        let owned_key = Bytes::copy_from_slice(key);
        with_conflict_retry(&self.config.increment_retry(), "increment", || {
            let key = owned_key.clone();
            self.run(move |conn, dialect, sql| dialect.increment(conn, sql, &key, amount))
        })
        .await
    }

    fn each_key(&self) -> KeyStream {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(err) => return failed_key_stream(err),
        };
        let statements = Arc::clone(&self.statements);
        let page_size = self.config.page_size();

        // State: the last key of the previous page, `None` once exhausted.
        stream::try_unfold(Some(None::<SqlValue>), move |cursor| {
            let pool = Arc::clone(&pool);
            let statements = Arc::clone(&statements);
            async move {
                let Some(after) = cursor else { return Ok(None) };
                let page = tokio::task::spawn_blocking(move || -> StoreResult<Vec<SqlValue>> {
                    let mut conn = pool.acquire()?;
                    Ok(match after {
                        None => conn.query_column(&statements.first_keys, &[])?,
                        Some(after) => conn.query_column(&statements.next_keys, &[after])?,
                    })
                })
                .await
                .map_err(join_error)??;
                let next = if page.len() < page_size { None } else { page.last().cloned().map(Some) };
                let keys = page.into_iter().map(SqlValue::into_bytes).map(Ok::<Bytes, StoreError>);
                Ok::<_, StoreError>(Some((stream::iter(keys), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self) -> StoreResult<()> {
        self.run(|conn, _, sql| Ok(conn.execute(&sql.clear, &[]).map(|_| ())?)).await
    }

    #[tracing::instrument(skip(self))]
    async fn close(&self) -> StoreResult<()> {
        let Some(pool) = self.pool.write().take() else { return Ok(()) };
        if self.owns_pool {
            tokio::task::spawn_blocking(move || pool.disconnect()).await.map_err(join_error)?;
        }
        Ok(())
    }
}
