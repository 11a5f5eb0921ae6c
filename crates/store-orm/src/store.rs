//! ORM-style adapter.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use kvbridge_store::{
    Capabilities, Capability, KeyStream, KeyValueStore, StoreError, StoreResult, failed_key_stream,
    with_conflict_retry,
};
use kvbridge_store_sql::{SharedPool, SqlConnection, SqlValue, transaction};
use parking_lot::RwLock;

use crate::{
    config::{ConnectionSource, OrmStoreConfig},
    registry::ConnectionRegistry,
    relation::{Assignment, Relation},
    table::{TableProvisioning, create_table_if_not_exists},
};

/// Key-value store over a relation with a textual key column.
///
/// Keys must be valid UTF-8. The pool is shared with the registry or the
/// caller; [`close`](KeyValueStore::close) only drops the store's reference.
///
/// ```
/// use bytes::Bytes;
/// use kvbridge_store::KeyValueStore;
/// use kvbridge_store_orm::{ConnectionSpec, OrmStore};
///
/// # tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap().block_on(async {
/// let store = OrmStore::builder()
///     .connection(ConnectionSpec::builder().adapter("sqlite").build().into())
///     .build()
///     .await
///     .unwrap();
///
/// assert!(store.create(b"user:1", Bytes::from("Ada")).await.unwrap());
/// assert!(!store.create(b"user:1", Bytes::from("Grace")).await.unwrap());
/// # });
/// ```
pub struct OrmStore {
    pool: RwLock<Option<SharedPool>>,
    relation: Arc<Relation>,
    config: OrmStoreConfig,
}

#[bon::bon]
impl OrmStore {
    /// Resolves the connection, provisions the table and returns the store.
    ///
    /// The registry defaults to [`ConnectionRegistry::global`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] when the connection cannot be
    /// resolved, or the driver error when provisioning fails.
    #[builder]
    pub async fn new(
        #[builder(default)] connection: ConnectionSource,
        #[builder(default)] config: OrmStoreConfig,
        #[builder(default)] create_table: TableProvisioning,
        registry: Option<Arc<ConnectionRegistry>>,
    ) -> StoreResult<Self> {
        config.validate().map_err(|err| StoreError::internal(err.to_string()))?;
        let registry = registry.unwrap_or_else(ConnectionRegistry::global);

        let pool = tokio::task::spawn_blocking(move || match connection {
            ConnectionSource::Named(name) => registry.retrieve_or_establish(&name),
            ConnectionSource::Spec(spec) => {
                let name = registry.register_spec(spec);
                registry.retrieve_or_establish(&name)
            },
            ConnectionSource::Pool(pool) => Ok(pool),
            ConnectionSource::Default => registry.default_pool(),
        })
        .await
        .map_err(join_error)??;

        let relation = Arc::new(Relation::new(
            config.table(),
            config.key_column(),
            config.value_column(),
            pool.kind(),
        ));
        let provision = (Arc::clone(&pool), Arc::clone(&relation));
        let created = tokio::task::spawn_blocking(move || {
            let (pool, relation) = provision;
            let mut conn = pool.acquire()?;
            create_table_if_not_exists(conn.as_mut(), &relation, &create_table)
        })
        .await
        .map_err(join_error)??;
        tracing::debug!(table = relation.table(), created, "orm store ready");

        Ok(Self { pool: RwLock::new(Some(pool)), relation, config })
    }
}

impl OrmStore {
    /// The relation statements are rendered against.
    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    fn pool(&self) -> StoreResult<SharedPool> {
        self.pool.read().clone().ok_or(StoreError::Closed)
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SqlConnection, &Relation) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool()?;
        let relation = Arc::clone(&self.relation);
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.acquire()?;
            op(conn.as_mut(), &relation)
        })
        .await
        .map_err(join_error)?
    }
}

impl fmt::Debug for OrmStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrmStore")
            .field("relation", &self.relation)
            .field("closed", &self.pool.read().is_none())
            .finish()
    }
}

fn join_error(err: tokio::task::JoinError) -> StoreError {
    StoreError::internal(format!("blocking database task failed: {err}"))
}

fn text_key(key: &[u8]) -> StoreResult<String> {
    String::from_utf8(key.to_vec()).map_err(|_| StoreError::invalid_key("key column is textual; key is not UTF-8"))
}

/// Reads the integer at `key`, failing with a type error when the stored
/// value is not one. `None` when the row is absent.
/// Counters are inserted as decimal text, which every binary column accepts.
fn decimal(n: i64) -> SqlValue {
    SqlValue::Blob(n.to_string().into_bytes())
}

fn select_integer(conn: &mut dyn SqlConnection, relation: &Relation, key: &str, lock: bool) -> StoreResult<Option<i64>> {
    let select = relation.select_value().key(key);
    let stmt = if lock { select.lock() } else { select }.build();
    conn.query_scalar(&stmt.sql, &stmt.params)?
        .map(|value| {
            value
                .as_integer()
                .map_err(|_| StoreError::type_mismatch(format!("stored value is not an integer: {value:?}")))
        })
        .transpose()
}

#[async_trait]
impl KeyValueStore for OrmStore {
    type Value = Bytes;

    const CAPABILITIES: Capabilities =
        Capabilities::NONE.with(Capability::Create).with(Capability::Increment).with(Capability::EachKey);

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        let key = text_key(key)?;
        self.run(move |conn, relation| {
            let stmt = relation.select_one().key(&key).build();
            Ok(conn.query_scalar(&stmt.sql, &stmt.params)?.is_some())
        })
        .await
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn load(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        let key = text_key(key)?;
        self.run(move |conn, relation| {
            let stmt = relation.select_value().key(&key).build();
            Ok(conn.query_scalar(&stmt.sql, &stmt.params)?.map(SqlValue::into_bytes))
        })
        .await
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len(), value_len = value.len()))]
    async fn store(&self, key: &[u8], value: Bytes) -> StoreResult<Bytes> {
        let key = text_key(key)?;
        with_conflict_retry(&self.config.write_retry, "store", || {
            let key = key.clone();
            let blob = SqlValue::from(value.as_ref());
            self.run(move |conn, relation| {
                let update = relation.update(Assignment::Value(blob.clone())).key(&key).build();
                if conn.execute(&update.sql, &update.params)? != 1 {
                    let insert = relation.insert(&key, blob).build();
                    conn.execute(&insert.sql, &insert.params)?;
                }
                Ok(())
            })
        })
        .await?;
        Ok(value)
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        let key = text_key(key)?;
        self.run(move |conn, relation| {
            transaction(conn, |tx| {
                let select = relation.select_value().key(&key).lock().build();
                let prior = tx.query_scalar(&select.sql, &select.params)?;
                let delete = relation.delete().key(&key).build();
                tx.execute(&delete.sql, &delete.params)?;
                Ok(prior.map(SqlValue::into_bytes))
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len()))]
    async fn create(&self, key: &[u8], value: Bytes) -> StoreResult<bool> {
        let key = text_key(key)?;
        self.run(move |conn, relation| {
            let insert = relation.insert(&key, SqlValue::from(value.as_ref())).build();
            match conn.execute(&insert.sql, &insert.params) {
                Ok(_) => Ok(true),
                Err(err) if err.is_unique_violation() => Ok(false),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn increment(&self, key: &[u8], amount: i64) -> StoreResult<i64> {
        let key = text_key(key)?;
        with_conflict_retry(&self.config.increment_retry, "increment", || {
            let key = key.clone();
            self.run(move |conn, relation| {
                let insert = relation.insert(&key, decimal(amount)).build();
                match conn.execute(&insert.sql, &insert.params) {
                    Ok(_) => return Ok(amount),
                    Err(err) if err.is_unique_violation() => {},
                    Err(err) => return Err(err.into()),
                }
                transaction(conn, |tx| {
                    if let Some(current) = select_integer(tx, relation, &key, true)? {
                        current
                            .checked_add(amount)
                            .ok_or_else(|| StoreError::type_mismatch("increment overflows a 64-bit integer"))?;
                    }
                    let update = relation.update(Assignment::Add(amount)).key(&key).build();
                    if tx.execute(&update.sql, &update.params)? != 1 {
                        return Err(StoreError::conflict("no row updated"));
                    }
                    select_integer(tx, relation, &key, false)?
                        .ok_or_else(|| StoreError::conflict("row vanished before read-back"))
                })
            })
        })
        .await
    }

    fn each_key(&self) -> KeyStream {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(err) => return failed_key_stream(err),
        };
        let relation = Arc::clone(&self.relation);
        let page_size = self.config.page_size;

        stream::try_unfold(Some(None::<String>), move |cursor| {
            let pool = Arc::clone(&pool);
            let relation = Arc::clone(&relation);
            async move {
                let Some(after) = cursor else { return Ok(None) };
                let page = tokio::task::spawn_blocking(move || -> StoreResult<Vec<SqlValue>> {
                    let mut conn = pool.acquire()?;
                    let stmt = relation.select_keys().after(after.as_deref()).limit(page_size).build();
                    Ok(conn.query_column(&stmt.sql, &stmt.params)?)
                })
                .await
                .map_err(join_error)??;
                let keys: Vec<Bytes> = page.into_iter().map(SqlValue::into_bytes).collect();
                let next = match keys.last() {
                    Some(last) if keys.len() >= page_size => {
                        Some(Some(String::from_utf8_lossy(last).into_owned()))
                    },
                    _ => None,
                };
                Ok::<_, StoreError>(Some((stream::iter(keys.into_iter().map(Ok::<Bytes, StoreError>)), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self) -> StoreResult<()> {
        self.run(|conn, relation| {
            let stmt = relation.delete().build();
            conn.execute(&stmt.sql, &stmt.params)?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn close(&self) -> StoreResult<()> {
        self.pool.write().take();
        Ok(())
    }
}
