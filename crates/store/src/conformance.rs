//! Conformance test suite for [`KeyValueStore`] implementations.
//!
//! Every adapter runs the same functions against a fresh, empty store to
//! check it honours the contract. Checks for optional operations assume the
//! store declares (or is wrapped to provide) the capability.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each function with a fresh store:
//!
//! ```no_run
//! use kvbridge_store::{MemoryStore, conformance};
//!
//! #[tokio::test]
//! async fn crud_load_missing_returns_none() {
//!     conformance::crud_load_missing_returns_none(&MemoryStore::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | exists/load/store/delete semantics |
//! | Create | insert-if-absent |
//! | Increment | integer add, type errors |
//! | Clear / close | bulk removal, handle release |
//! | Enumeration | `each_key` completeness |
//! | Scenarios | end-to-end call sequences |
//! | Concurrent | create exclusivity, lost-update freedom, delete atomicity |
//!
//! Keys are printable ASCII so textual-key backends can run every check.

use std::{collections::BTreeSet, sync::Arc};

use bytes::Bytes;
use futures::TryStreamExt;
use tokio::task::JoinSet;

use crate::{assert_store_error, backend::KeyValueStore, value::StoreValue};

fn value<S: KeyValueStore>(text: &'static str) -> S::Value
where
    S::Value: From<&'static str>,
{
    S::Value::from(text)
}

// ============================================================================
// CRUD
// ============================================================================

/// `load` on a missing key returns `Ok(None)` rather than an error.
pub async fn crud_load_missing_returns_none<S: KeyValueStore>(store: &S) {
    let result = store.load(b"missing").await;
    assert!(result.is_ok(), "load should not error on a missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None);
    assert!(!store.exists(b"missing").await.expect("exists"));
}

/// `store` returns the stored value and `load` reads it back.
pub async fn crud_store_then_load<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    let stored = store.store(b"crud:k1", value::<S>("v1")).await.expect("store");
    assert_eq!(stored, value::<S>("v1"), "store returns the value it wrote");
    assert!(store.exists(b"crud:k1").await.expect("exists"));
    assert_eq!(store.load(b"crud:k1").await.expect("load"), Some(value::<S>("v1")));
}

/// A second `store` overwrites the first.
pub async fn crud_store_overwrites<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"crud:k2", value::<S>("original")).await.expect("store");
    store.store(b"crud:k2", value::<S>("updated")).await.expect("overwrite");
    assert_eq!(store.load(b"crud:k2").await.expect("load"), Some(value::<S>("updated")));
}

/// The empty value survives a round trip.
pub async fn crud_empty_value_roundtrip<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"crud:empty", value::<S>("")).await.expect("store");
    assert!(store.exists(b"crud:empty").await.expect("exists"));
    assert_eq!(store.load(b"crud:empty").await.expect("load"), Some(value::<S>("")));
}

/// `delete` returns the prior value and removes the key.
pub async fn crud_delete_returns_prior_value<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"crud:del", value::<S>("gone")).await.expect("store");
    assert_eq!(store.delete(b"crud:del").await.expect("delete"), Some(value::<S>("gone")));
    assert!(!store.exists(b"crud:del").await.expect("exists"));
    assert_eq!(store.load(b"crud:del").await.expect("load"), None);
}

/// `delete` on a missing key returns `Ok(None)`.
pub async fn crud_delete_missing_returns_none<S: KeyValueStore>(store: &S) {
    assert_eq!(store.delete(b"crud:ghost").await.expect("delete"), None);
}

/// Keys differing in one byte address different entries.
pub async fn crud_keys_are_distinct<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"crud:a", value::<S>("A")).await.expect("store a");
    store.store(b"crud:b", value::<S>("B")).await.expect("store b");
    store.store(b"crud:a ", value::<S>("A2")).await.expect("store a2");
    assert_eq!(store.load(b"crud:a").await.expect("load"), Some(value::<S>("A")));
    assert_eq!(store.load(b"crud:b").await.expect("load"), Some(value::<S>("B")));
    assert_eq!(store.load(b"crud:a ").await.expect("load"), Some(value::<S>("A2")));
}

// ============================================================================
// Create
// ============================================================================

/// `create` on an absent key inserts and returns `true`.
pub async fn create_inserts_when_absent<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    assert!(store.create(b"create:new", value::<S>("first")).await.expect("create"));
    assert_eq!(store.load(b"create:new").await.expect("load"), Some(value::<S>("first")));
}

/// `create` on a present key returns `false` and leaves the value alone.
pub async fn create_refuses_existing<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"create:old", value::<S>("kept")).await.expect("store");
    assert!(!store.create(b"create:old", value::<S>("lost")).await.expect("create"));
    assert_eq!(store.load(b"create:old").await.expect("load"), Some(value::<S>("kept")));
}

// ============================================================================
// Increment
// ============================================================================

/// `increment` on an absent key initialises it to the amount.
pub async fn increment_initialises_absent_key<S: KeyValueStore>(store: &S) {
    assert_eq!(store.increment(b"inc:new", 7).await.expect("increment"), 7);
    let loaded = store.load(b"inc:new").await.expect("load").expect("present");
    assert_eq!(loaded.to_integer().expect("integer"), 7);
}

/// Repeated increments accumulate, including negative amounts and zero.
pub async fn increment_accumulates<S: KeyValueStore>(store: &S) {
    assert_eq!(store.increment(b"inc:acc", 10).await.expect("first"), 10);
    assert_eq!(store.increment(b"inc:acc", -15).await.expect("second"), -5);
    assert_eq!(store.increment(b"inc:acc", 0).await.expect("zero"), -5);
}

/// `increment` continues from a value written by `store`.
pub async fn increment_existing_stored_integer<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"inc:stored", value::<S>("41")).await.expect("store");
    assert_eq!(store.increment(b"inc:stored", 1).await.expect("increment"), 42);
}

/// `increment` on a non-integer fails with a type error and changes nothing.
pub async fn increment_non_integer_is_type_error<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"inc:text", value::<S>("not a number")).await.expect("store");
    let result = store.increment(b"inc:text", 1).await;
    assert_store_error!(result, TypeMismatch, "increment of text must be a type error");
    assert_eq!(store.load(b"inc:text").await.expect("load"), Some(value::<S>("not a number")));
}

// ============================================================================
// Clear / close
// ============================================================================

/// `clear` removes everything and is idempotent.
pub async fn clear_is_idempotent<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    for key in [&b"clear:1"[..], b"clear:2", b"clear:3"] {
        store.store(key, value::<S>("x")).await.expect("store");
    }
    store.clear().await.expect("clear");
    for key in [&b"clear:1"[..], b"clear:2", b"clear:3"] {
        assert!(!store.exists(key).await.expect("exists"), "{key:?} survived clear");
    }
    store.clear().await.expect("second clear");
    assert!(!store.exists(b"clear:1").await.expect("exists"));

    store.store(b"clear:after", value::<S>("y")).await.expect("store after clear");
    assert_eq!(store.load(b"clear:after").await.expect("load"), Some(value::<S>("y")));
}

/// `close` is idempotent and later operations fail with `Closed`.
pub async fn close_is_idempotent<S: KeyValueStore>(store: &S) {
    store.close().await.expect("close");
    store.close().await.expect("second close");
    assert_store_error!(store.load(b"k").await, Closed, "load after close");
    assert_store_error!(store.exists(b"k").await, Closed, "exists after close");
}

// ============================================================================
// Enumeration
// ============================================================================

/// `each_key` yields every stored key exactly once.
pub async fn each_key_yields_every_key<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    let mut expected = BTreeSet::new();
    for i in 0..25 {
        let key = format!("enum:{i:03}");
        store.store(key.as_bytes(), value::<S>("v")).await.expect("store");
        expected.insert(Bytes::from(key));
    }
    let keys: Vec<Bytes> = store.each_key().try_collect().await.expect("each_key");
    let unique: BTreeSet<Bytes> = keys.iter().cloned().collect();
    assert_eq!(unique.len(), keys.len(), "each_key yielded duplicates");
    assert_eq!(unique, expected);
}

/// `each_key` on an empty store yields nothing.
pub async fn each_key_empty_store<S: KeyValueStore>(store: &S) {
    let keys: Vec<Bytes> = store.each_key().try_collect().await.expect("each_key");
    assert!(keys.is_empty(), "expected no keys, got {keys:?}");
}

// ============================================================================
// Scenarios
// ============================================================================

/// `create("x", 1)` → true, `create("x", 2)` → false, `load("x")` → 1.
pub async fn scenario_create_twice<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    assert!(store.create(b"x", value::<S>("1")).await.expect("first create"));
    assert!(!store.create(b"x", value::<S>("2")).await.expect("second create"));
    assert_eq!(store.load(b"x").await.expect("load"), Some(value::<S>("1")));
}

/// `increment("ctr", 5)` → 5, `increment("ctr", -2)` → 3, load reads 3.
pub async fn scenario_counter<S: KeyValueStore>(store: &S) {
    assert_eq!(store.increment(b"ctr", 5).await.expect("increment"), 5);
    assert_eq!(store.increment(b"ctr", -2).await.expect("decrement"), 3);
    let loaded = store.load(b"ctr").await.expect("load").expect("present");
    assert_eq!(loaded.to_integer().expect("integer"), 3);
}

/// Two stores then a delete returns the latest value.
pub async fn scenario_overwrite_then_delete<S: KeyValueStore>(store: &S)
where
    S::Value: From<&'static str>,
{
    store.store(b"k", value::<S>("a")).await.expect("store a");
    store.store(b"k", value::<S>("b")).await.expect("store b");
    assert_eq!(store.delete(b"k").await.expect("delete"), Some(value::<S>("b")));
    assert!(!store.exists(b"k").await.expect("exists"));
}

// ============================================================================
// Concurrent
// ============================================================================

/// N concurrent `create` calls on one key produce exactly one winner whose
/// payload is the one stored.
pub async fn concurrent_create_has_one_winner<S>(store: Arc<S>, tasks: usize)
where
    S: KeyValueStore + 'static,
    S::Value: From<String>,
{
    let mut set = JoinSet::new();
    for i in 0..tasks {
        let store = Arc::clone(&store);
        set.spawn(async move {
            let payload = format!("payload-{i}");
            let won = store.create(b"race:create", S::Value::from(payload.clone())).await;
            (payload, won)
        });
    }

    let mut winners = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (payload, won) = joined.expect("task join");
        if won.expect("create must not fail under contention") {
            winners.push(payload);
        }
    }
    assert_eq!(winners.len(), 1, "exactly one create wins, got {winners:?}");
    let stored = store.load(b"race:create").await.expect("load");
    assert_eq!(stored, Some(S::Value::from(winners.remove(0))));
}

/// Concurrent increments are never lost.
pub async fn concurrent_increments_are_not_lost<S>(store: Arc<S>, tasks: usize, per_task: usize)
where
    S: KeyValueStore + 'static,
{
    let mut set = JoinSet::new();
    for i in 0..tasks {
        let store = Arc::clone(&store);
        set.spawn(async move {
            let amount = i64::try_from(i % 3).unwrap_or(0) + 1;
            for _ in 0..per_task {
                store.increment(b"race:counter", amount).await.expect("increment");
            }
            amount * i64::try_from(per_task).unwrap_or(0)
        });
    }

    let mut expected = 0;
    while let Some(joined) = set.join_next().await {
        expected += joined.expect("task join");
    }
    let stored = store.load(b"race:counter").await.expect("load").expect("present");
    assert_eq!(stored.to_integer().expect("integer"), expected);
}

/// Racing deletes observe the stored value at most once, and each observed
/// value was actually written.
pub async fn concurrent_delete_returns_value_once<S>(store: Arc<S>, tasks: usize)
where
    S: KeyValueStore + 'static,
    S::Value: From<String>,
{
    for round in 0..5 {
        let payload = format!("round-{round}");
        store.store(b"race:delete", S::Value::from(payload)).await.expect("store");

        let mut set = JoinSet::new();
        for _ in 0..tasks {
            let store = Arc::clone(&store);
            set.spawn(async move { store.delete(b"race:delete").await });
        }
        let mut observed = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Some(v) = joined.expect("task join").expect("delete") {
                observed.push(v);
            }
        }
        assert_eq!(observed.len(), 1, "round {round}: one delete returns the value");
        assert_eq!(observed[0], S::Value::from(format!("round-{round}")));
    }
    assert!(!store.exists(b"race:delete").await.expect("exists"));
}

/// Concurrent stores to distinct keys all land.
pub async fn concurrent_stores_to_distinct_keys<S>(store: Arc<S>, tasks: usize)
where
    S: KeyValueStore + 'static,
    S::Value: From<String>,
{
    let mut set = JoinSet::new();
    for i in 0..tasks {
        let store = Arc::clone(&store);
        set.spawn(async move {
            let key = format!("conc:{i:04}");
            store.store(key.as_bytes(), S::Value::from(format!("val:{i}"))).await.map(|_| ())
        });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task join").expect("store");
    }
    for i in 0..tasks {
        let key = format!("conc:{i:04}");
        assert_eq!(
            store.load(key.as_bytes()).await.expect("load"),
            Some(S::Value::from(format!("val:{i}"))),
        );
    }
}

// ============================================================================
// Test generation
// ============================================================================

/// Generates one `#[tokio::test]` per conformance check.
///
/// `$factory` is an async expression producing a fresh, empty store; it is
/// evaluated once per test. Each group is opt-in so adapters only run the
/// checks for capabilities they provide:
///
/// ```ignore
/// kvbridge_store::conformance_tests!(core, memory_store());
/// kvbridge_store::conformance_tests!(create, memory_store());
/// kvbridge_store::conformance_tests!(increment, memory_store());
/// kvbridge_store::conformance_tests!(each_key, memory_store());
/// kvbridge_store::conformance_tests!(concurrent, memory_store());
/// ```
#[macro_export]
macro_rules! conformance_tests {
    (core, $factory:expr) => {
        $crate::conformance_tests!(@single $factory;
            crud_load_missing_returns_none,
            crud_store_then_load,
            crud_store_overwrites,
            crud_empty_value_roundtrip,
            crud_delete_returns_prior_value,
            crud_delete_missing_returns_none,
            crud_keys_are_distinct,
            clear_is_idempotent,
            close_is_idempotent,
            scenario_overwrite_then_delete,
        );
    };
    (create, $factory:expr) => {
        $crate::conformance_tests!(@single $factory;
            create_inserts_when_absent,
            create_refuses_existing,
            scenario_create_twice,
        );
    };
    (increment, $factory:expr) => {
        $crate::conformance_tests!(@single $factory;
            increment_initialises_absent_key,
            increment_accumulates,
            increment_existing_stored_integer,
            increment_non_integer_is_type_error,
            scenario_counter,
        );
    };
    (each_key, $factory:expr) => {
        $crate::conformance_tests!(@single $factory;
            each_key_yields_every_key,
            each_key_empty_store,
        );
    };
    (concurrent, $factory:expr) => {
        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_create_has_one_winner() {
            let store = ::std::sync::Arc::new($factory.await);
            $crate::conformance::concurrent_create_has_one_winner(store, 16).await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_increments_are_not_lost() {
            let store = ::std::sync::Arc::new($factory.await);
            $crate::conformance::concurrent_increments_are_not_lost(store, 8, 10).await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_delete_returns_value_once() {
            let store = ::std::sync::Arc::new($factory.await);
            $crate::conformance::concurrent_delete_returns_value_once(store, 8).await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_stores_to_distinct_keys() {
            let store = ::std::sync::Arc::new($factory.await);
            $crate::conformance::concurrent_stores_to_distinct_keys(store, 32).await;
        }
    };
    (@single $factory:expr; $($check:ident),+ $(,)?) => {
        $(
            #[tokio::test]
            async fn $check() {
                let store = $factory.await;
                $crate::conformance::$check(&store).await;
            }
        )+
    };
}
