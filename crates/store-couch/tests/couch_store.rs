//! Revision handling, retries and the document layout of `CouchStore`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::{StreamExt, TryStreamExt};
use kvbridge_store::{Defaults, KeyValueStore, RetryPolicy, StoreError, assert_store_error};
use kvbridge_store_couch::{CouchConfig, CouchStore, DocumentValue, testutil::MockCouchServer};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value, json};

const DB: &str = "kvbridge";

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object")
}

fn methods(server: &MockCouchServer) -> Vec<Method> {
    server.requests().into_iter().map(|(method, _)| method).collect()
}

async fn store_with_retry(server: &MockCouchServer, max_retries: u32) -> CouchStore {
    let config = CouchConfig::builder()
        .port(server.port())
        .write_retry(RetryPolicy::builder().max_retries(max_retries).build())
        .build()
        .unwrap();
    CouchStore::connect(config).await.unwrap()
}

// ---------------------------------------------------------------------------
// Revisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cached_revision_skips_the_lookup() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;

    store.store(b"doc", "one".into()).await.unwrap();
    server.clear_requests();
    store.store(b"doc", "two".into()).await.unwrap();

    assert_eq!(methods(&server), vec![Method::PUT]);
    assert_eq!(store.load(b"doc").await.unwrap(), Some("two".into()));
}

#[tokio::test]
async fn stale_revision_is_refreshed_and_retried() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;

    store.store(b"doc", "mine".into()).await.unwrap();
    server.write_behind(DB, "doc", json!({"value": "theirs", "type": "String"})).unwrap();
    server.clear_requests();

    store.store(b"doc", "mine again".into()).await.unwrap();

    assert_eq!(methods(&server), vec![Method::PUT, Method::HEAD, Method::PUT]);
    assert_eq!(server.document(DB, "doc").unwrap(), object(json!({"value": "mine again", "type": "String"})));
    assert_eq!(store.revisions().get("doc").await, server.revision(DB, "doc"));
}

#[tokio::test]
async fn reads_populate_the_revision_cache() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    server.write_behind(DB, "seen", json!({"value": 1, "type": "Number"})).unwrap();

    assert_eq!(store.load(b"seen").await.unwrap(), Some(DocumentValue::from(1)));
    assert_eq!(store.revisions().get("seen").await, server.revision(DB, "seen"));

    server.clear_requests();
    store.store(b"seen", DocumentValue::from(2)).await.unwrap();
    assert_eq!(methods(&server), vec![Method::PUT]);
}

#[tokio::test]
async fn listing_populates_the_revision_cache() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    for id in ["a", "b", "c"] {
        server.write_behind(DB, id, json!({"value": id, "type": "String"})).unwrap();
    }

    let keys: Vec<_> = store.each_key().try_collect().await.unwrap();
    assert_eq!(keys, vec!["a", "b", "c"]);

    server.clear_requests();
    store.store(b"b", "B".into()).await.unwrap();
    assert_eq!(methods(&server), vec![Method::PUT]);
}

#[tokio::test]
async fn exists_miss_forgets_the_revision() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    store.store(b"gone", "x".into()).await.unwrap();

    let other = server.store().await;
    assert_eq!(other.delete(b"gone").await.unwrap(), Some("x".into()));

    assert!(!store.exists(b"gone").await.unwrap());
    assert_eq!(store.revisions().get("gone").await, None);
    store.store(b"gone", "back".into()).await.unwrap();
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_errors_on_writes_are_retried() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;

    server.fail_next(StatusCode::SERVICE_UNAVAILABLE, 2);
    store.store(b"k", "v".into()).await.unwrap();
    assert_eq!(store.load(b"k").await.unwrap(), Some("v".into()));

    server.fail_next(StatusCode::BAD_GATEWAY, 1);
    assert!(store.create(b"fresh", "v".into()).await.unwrap());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    store.store(b"k", "v".into()).await.unwrap();

    server.clear_requests();
    server.fail_next(StatusCode::BAD_REQUEST, 1);
    let result = store.store(b"k", "w".into()).await;

    assert!(matches!(result, Err(StoreError::Backend { status: Some(400), .. })), "{result:?}");
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn persistent_conflicts_exhaust_the_budget() {
    let server = MockCouchServer::start().await;
    let store = store_with_retry(&server, 2).await;
    store.store(b"k", "v".into()).await.unwrap();

    server.fail_next(StatusCode::CONFLICT, 10);
    let result = store.store(b"k", "w".into()).await;

    assert!(matches!(result, Err(StoreError::RetriesExhausted { attempts: 3, .. })), "{result:?}");
}

#[tokio::test]
async fn reads_do_not_retry() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;

    server.fail_next(StatusCode::SERVICE_UNAVAILABLE, 1);
    assert_store_error!(store.load(b"k").await, Connection);
    assert_eq!(store.load(b"k").await.unwrap(), None);
}

#[tokio::test]
async fn create_conflict_is_false_without_retry() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;

    assert!(store.create(b"once", "first".into()).await.unwrap());
    server.clear_requests();
    assert!(!store.create(b"once", "second".into()).await.unwrap());

    assert_eq!(methods(&server), vec![Method::PUT]);
    assert_eq!(store.load(b"once").await.unwrap(), Some("first".into()));
}

// ---------------------------------------------------------------------------
// Document layout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scalars_and_hashes_on_the_wire() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;

    store.store(b"s", "text".into()).await.unwrap();
    store.store(b"n", DocumentValue::from(42)).await.unwrap();
    let profile = object(json!({"name": "Ada", "langs": ["en", "fr"]}));
    store.store(b"h", profile.into()).await.unwrap();

    assert_eq!(server.document(DB, "s").unwrap(), object(json!({"value": "text", "type": "String"})));
    assert_eq!(server.document(DB, "n").unwrap(), object(json!({"value": 42, "type": "Number"})));
    assert_eq!(
        server.document(DB, "h").unwrap(),
        object(json!({"name": "Ada", "langs": ["en", "fr"], "type": "Hash"}))
    );

    let loaded = store.load(b"h").await.unwrap().unwrap();
    assert_eq!(loaded, DocumentValue::Hash(object(json!({"name": "Ada", "langs": ["en", "fr"]}))));
}

#[tokio::test]
async fn hashes_using_reserved_fields_are_rejected() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    store.store(b"k", "before".into()).await.unwrap();
    server.clear_requests();

    let role = object(json!({"type": "admin", "value": 1}));
    assert_store_error!(store.store(b"k", role.clone().into()).await, Serialization);
    assert_store_error!(store.create(b"fresh", role.into()).await, Serialization);
    let spoofed = object(json!({"_id": "x", "value": 1}));
    assert_store_error!(store.store(b"k", spoofed.into()).await, Serialization);

    assert!(server.requests().is_empty());
    assert_eq!(store.load(b"k").await.unwrap(), Some("before".into()));
    assert!(!store.exists(b"fresh").await.unwrap());
}

#[tokio::test]
async fn custom_field_names() {
    let server = MockCouchServer::start().await;
    let config = CouchConfig::builder()
        .port(server.port())
        .database("cache")
        .value_field("payload")
        .type_field("kind")
        .build()
        .unwrap();
    let store = CouchStore::connect(config).await.unwrap();

    store.store(b"k", "v".into()).await.unwrap();
    assert!(server.has_database("cache"));
    assert_eq!(server.document("cache", "k").unwrap(), object(json!({"payload": "v", "kind": "String"})));
}

#[tokio::test]
async fn fallback_increment_reads_strings_and_writes_numbers() {
    let server = MockCouchServer::start().await;
    let store = Defaults::new(server.store().await);

    store.store(b"hits", "41".into()).await.unwrap();
    assert_eq!(store.increment(b"hits", 1).await.unwrap(), 42);
    assert_eq!(server.document(DB, "hits").unwrap(), object(json!({"value": 42, "type": "Number"})));

    store.store(b"profile", object(json!({"a": 1})).into()).await.unwrap();
    assert_store_error!(store.increment(b"profile", 1).await, TypeMismatch);
}

// ---------------------------------------------------------------------------
// Keys, lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn keys_are_percent_encoded() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    let key = "users/ada lovelace?#1";

    store.store(key.as_bytes(), "v".into()).await.unwrap();
    assert!(server.document(DB, key).is_some());
    assert_eq!(store.load(key.as_bytes()).await.unwrap(), Some("v".into()));

    let keys: Vec<_> = store.each_key().try_collect().await.unwrap();
    assert_eq!(keys, vec![key]);
    assert_eq!(store.delete(key.as_bytes()).await.unwrap(), Some("v".into()));
}

#[tokio::test]
async fn invalid_keys_are_rejected() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;

    assert_store_error!(store.store(&[0xff, 0x00], "v".into()).await, InvalidKey);
    assert_store_error!(store.load(b"").await, InvalidKey);
    assert_store_error!(store.create(&[0xc3], "v".into()).await, InvalidKey);
}

#[tokio::test]
async fn connect_accepts_an_existing_database() {
    let server = MockCouchServer::start().await;
    let first = server.store().await;
    first.store(b"k", "v".into()).await.unwrap();

    let second = server.store().await;
    assert_eq!(second.load(b"k").await.unwrap(), Some("v".into()));
}

#[tokio::test]
async fn connect_reports_server_failures() {
    let server = MockCouchServer::start().await;
    server.fail_next(StatusCode::INTERNAL_SERVER_ERROR, 1);
    assert_store_error!(CouchStore::connect(server.config()).await, Connection);

    server.fail_next(StatusCode::UNAUTHORIZED, 1);
    assert_store_error!(CouchStore::connect(server.config()).await, Backend);
}

#[tokio::test]
async fn clear_recreates_the_database_and_forgets_revisions() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    store.store(b"k", "v".into()).await.unwrap();

    store.clear().await.unwrap();

    assert!(server.has_database(DB));
    assert!(server.document(DB, "k").is_none());
    assert_eq!(store.revisions().get("k").await, None);
    assert!(store.create(b"k", "again".into()).await.unwrap());
}

#[tokio::test]
async fn close_forgets_revisions() {
    let server = MockCouchServer::start().await;
    let store = server.store().await;
    store.store(b"k", "v".into()).await.unwrap();

    store.close().await.unwrap();
    assert_eq!(store.revisions().get("k").await, None);
    assert_store_error!(store.store(b"k", "w".into()).await, Closed);

    let listed: Result<Vec<_>, _> = store.each_key().try_collect().await;
    assert_store_error!(listed, Closed);
}

#[tokio::test]
async fn close_stops_an_enumeration_in_flight() {
    let server = MockCouchServer::start().await;
    let config = CouchConfig::builder().port(server.port()).page_size(2).build().unwrap();
    let store = CouchStore::connect(config).await.unwrap();
    for id in ["a", "b", "c", "d", "e"] {
        server.write_behind(DB, id, json!({"value": id, "type": "String"})).unwrap();
    }

    let mut keys = store.each_key();
    assert_eq!(keys.next().await.unwrap().unwrap(), "a");
    assert_eq!(keys.next().await.unwrap().unwrap(), "b");

    store.close().await.unwrap();
    server.clear_requests();
    assert_store_error!(keys.next().await.unwrap(), Closed);
    assert!(keys.next().await.is_none());
    assert_eq!(server.request_count(&Method::GET), 0);
}
