//! Connection resolution, provisioning and key handling of `OrmStore`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use kvbridge_store::{KeyValueStore, assert_store_error};
use kvbridge_store_orm::{
    ConnectionRegistry, ConnectionSource, ConnectionSpec, OrmStore, OrmStoreConfig, TableProvisioning,
};
use kvbridge_store_sql::{ConnectionPool, SharedPool, SqlConnection, SqlitePool};

fn memory_pool() -> SharedPool {
    Arc::new(SqlitePool::memory().unwrap())
}

async fn store_on(pool: SharedPool) -> OrmStore {
    OrmStore::builder().connection(ConnectionSource::Pool(pool)).build().await.unwrap()
}

#[tokio::test]
async fn non_utf8_keys_are_rejected() {
    let store = store_on(memory_pool()).await;
    assert_store_error!(store.store(&[0xff, 0xfe], Bytes::from("v")).await, InvalidKey);
    assert_store_error!(store.load(&[0xc3]).await, InvalidKey);
    assert_store_error!(store.increment(&[0x80], 1).await, InvalidKey);
}

#[tokio::test]
async fn close_drops_the_reference_but_not_the_pool() {
    let pool = memory_pool();
    let store = store_on(pool.clone()).await;
    store.store(b"k", Bytes::from("v")).await.unwrap();

    store.close().await.unwrap();
    store.close().await.unwrap();
    assert!(!pool.is_closed());
    assert_store_error!(store.exists(b"k").await, Closed);

    let again = store_on(pool).await;
    assert_eq!(again.load(b"k").await.unwrap(), Some(Bytes::from("v")));
}

#[tokio::test]
async fn same_spec_shares_one_pool() {
    let registry = Arc::new(ConnectionRegistry::new());
    let spec = ConnectionSpec::builder().adapter("sqlite").password("ignored").build();

    let a = OrmStore::builder()
        .connection(spec.clone().into())
        .registry(registry.clone())
        .build()
        .await
        .unwrap();
    let b = OrmStore::builder()
        .connection(ConnectionSource::Named(spec.name()))
        .registry(registry.clone())
        .build()
        .await
        .unwrap();

    a.store(b"shared", Bytes::from("yes")).await.unwrap();
    assert_eq!(b.load(b"shared").await.unwrap(), Some(Bytes::from("yes")));
    assert!(registry.retrieve_pool(&spec.name()).is_some());
}

#[tokio::test]
async fn unknown_names_and_missing_default_fail() {
    let registry = Arc::new(ConnectionRegistry::new());
    let named = OrmStore::builder()
        .connection(ConnectionSource::Named("production".into()))
        .registry(registry.clone())
        .build()
        .await;
    assert_store_error!(named, Connection);

    let default = OrmStore::builder().registry(registry.clone()).build().await;
    assert_store_error!(default, Connection);

    registry.set_default_pool(memory_pool());
    let store = OrmStore::builder().registry(registry).build().await.unwrap();
    assert!(store.create(b"k", Bytes::from("v")).await.unwrap());
}

#[tokio::test]
async fn custom_hook_creates_the_table() {
    let calls = Arc::new(AtomicUsize::new(0));
    let hook = {
        let calls = Arc::clone(&calls);
        TableProvisioning::custom(move |conn, relation| {
            calls.fetch_add(1, Ordering::SeqCst);
            conn.execute_batch(&format!(
                "CREATE TABLE {} ({} TEXT PRIMARY KEY, {} BLOB)",
                relation.quote(relation.table()),
                relation.quote(relation.key_column()),
                relation.quote(relation.value_column()),
            ))
        })
    };
    let pool = memory_pool();
    let store = OrmStore::builder()
        .connection(ConnectionSource::Pool(pool.clone()))
        .create_table(hook.clone())
        .build()
        .await
        .unwrap();
    assert_eq!(store.increment(b"n", 2).await.unwrap(), 2);

    OrmStore::builder().connection(ConnectionSource::Pool(pool)).create_table(hook).build().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skip_uses_an_existing_table() {
    let pool = memory_pool();
    pool.acquire()
        .unwrap()
        .execute_batch("CREATE TABLE legacy (id TEXT PRIMARY KEY, data BLOB)")
        .unwrap();
    pool.acquire()
        .unwrap()
        .execute("INSERT INTO legacy (id, data) VALUES ('old', x'6869')", &[])
        .unwrap();

    let config =
        OrmStoreConfig::builder().table("legacy").key_column("id").value_column("data").build().unwrap();
    let store = OrmStore::builder()
        .connection(ConnectionSource::Pool(pool.clone()))
        .config(config)
        .create_table(TableProvisioning::Skip)
        .build()
        .await
        .unwrap();

    assert_eq!(store.load(b"old").await.unwrap(), Some(Bytes::from("hi")));
    assert_eq!(store.delete(b"old").await.unwrap(), Some(Bytes::from("hi")));
    let remaining = pool.acquire().unwrap().query_column("SELECT id FROM legacy", &[]).unwrap();
    assert!(remaining.is_empty());
}
