//! Throughput of the SQL adapter's hot paths on an in-memory SQLite pool.
//!
//! ```bash
//! cargo bench -p kvbridge-store-sql
//! cargo bench -p kvbridge-store-sql -- increment_operations
//! ```
//!
//! - `store_operations`: unconditional writes and point reads
//! - `increment_operations`: counter updates on new and existing keys
//! - `retry`: the conflict retry wrapper around a cheap operation

#![allow(clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use kvbridge_store::{KeyValueStore, RetryPolicy, StoreError, with_conflict_retry};
use kvbridge_store_sql::{SqlStore, SqlStoreConfig, SqliteConfig};
use tokio::runtime::Runtime;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rt() -> Runtime {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("failed to create tokio runtime")
}

fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}{idx:08}").into_bytes()
}

fn open_store(rt: &Runtime) -> SqlStore {
    rt.block_on(SqlStore::sqlite(SqliteConfig::memory(), SqlStoreConfig::default())).expect("open store")
}

// ---------------------------------------------------------------------------
// 1. store_operations
// ---------------------------------------------------------------------------

fn store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");
    let rt = rt();
    let store = open_store(&rt);

    for &value_size in &[64, 4096] {
        let value = Bytes::from(vec![b'x'; value_size]);
        group.throughput(Throughput::Bytes(value_size as u64));
        group.bench_with_input(BenchmarkId::new("overwrite", value_size), &value_size, |b, _| {
            b.to_async(&rt).iter(|| async { store.store(b"hot", value.clone()).await.expect("store failed") });
        });
    }

    rt.block_on(store.store(b"read", Bytes::from_static(b"value"))).expect("seed");
    group.bench_function("load_existing", |b| {
        b.to_async(&rt).iter(|| async { store.load(b"read").await.expect("load failed") });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. increment_operations
// ---------------------------------------------------------------------------

fn increment_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("increment_operations");
    let rt = rt();
    let store = open_store(&rt);

    group.bench_function("existing_key", |b| {
        b.to_async(&rt).iter(|| async { store.increment(b"counter", 1).await.expect("increment failed") });
    });

    let counter = AtomicUsize::new(0);
    group.bench_function("new_key", |b| {
        b.to_async(&rt).iter(|| {
            let key = make_key("fresh:", counter.fetch_add(1, Ordering::Relaxed));
            let store = &store;
            async move { store.increment(&key, 1).await.expect("increment failed") }
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. retry
// ---------------------------------------------------------------------------

fn retry(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry");
    let rt = rt();
    let policy = RetryPolicy::increments();

    group.bench_function("first_attempt", |b| {
        b.to_async(&rt).iter(|| with_conflict_retry(&policy, "bench", || async { Ok::<_, StoreError>(1) }));
    });

    group.bench_function("one_conflict", |b| {
        b.to_async(&rt).iter(|| {
            let mut attempts = 0_u32;
            with_conflict_retry(&policy, "bench", move || {
                attempts += 1;
                let first = attempts == 1;
                async move { if first { Err(StoreError::conflict("lost race")) } else { Ok(attempts) } }
            })
        });
    });

    group.finish();
}

criterion_group!(benches, store_operations, increment_operations, retry);
criterion_main!(benches);
