//! In-process mock document server.
//!
//! [`MockCouchServer`] speaks the subset of the CouchDB HTTP API the adapter
//! uses, with real revision checks:
//!
//! - `PUT /{db}` (201, or 412 when it exists), `DELETE /{db}`
//! - `HEAD|GET|PUT|DELETE /{db}/{id}`; writes to an existing document must
//!   carry its current `_rev` (body) or `rev` (query), else 409
//! - `GET /{db}/_all_docs?limit=&skip=`
//!
//! Failures can be queued with [`fail_next`](MockCouchServer::fail_next) and
//! every request is logged.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, Method, StatusCode, header::ETAG},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;

use crate::{CouchConfig, CouchStore};

#[derive(Debug, Clone)]
struct StoredDoc {
    rev: String,
    generation: u64,
    body: Map<String, Value>,
}

#[derive(Debug, Default)]
struct MockState {
    databases: HashMap<String, BTreeMap<String, StoredDoc>>,
    failures: VecDeque<StatusCode>,
    requests: Vec<(Method, String)>,
    rev_counter: u64,
}

impl MockState {
    fn next_rev(&mut self, generation: u64) -> String {
        self.rev_counter += 1;
        format!("{generation}-{:032x}", self.rev_counter)
    }

    /// Stores `body` as the next generation of `id`.
    fn write(&mut self, db: &str, id: &str, mut body: Map<String, Value>) -> Option<String> {
        body.remove("_id");
        body.remove("_rev");
        let generation = self.databases.get(db)?.get(id).map_or(1, |doc| doc.generation + 1);
        let rev = self.next_rev(generation);
        self.databases.get_mut(db)?.insert(id.to_owned(), StoredDoc { rev: rev.clone(), generation, body });
        Some(rev)
    }
}

type Shared = Arc<Mutex<MockState>>;

/// Mock document server bound to an ephemeral local port.
#[derive(Debug)]
pub struct MockCouchServer {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl MockCouchServer {
    /// Binds `127.0.0.1:0` and serves until [`shutdown`](Self::shutdown) or
    /// the end of the runtime, even if the handle is dropped.
    pub async fn start() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/:db", put(create_database).delete(drop_database))
            .route("/:db/_all_docs", get(all_docs))
            .route("/:db/:id", get(get_document).put(put_document).delete(delete_document))
            .layer(middleware::from_fn_with_state(Arc::clone(&state), record_and_inject))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });
        Self { addr, state, handle }
    }

    /// Port the server listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Configuration pointing at this server's default database.
    pub fn config(&self) -> CouchConfig {
        CouchConfig::builder().host(self.addr.ip().to_string()).port(self.addr.port()).build().expect("valid config")
    }

    /// Connects a store with [`config`](Self::config).
    pub async fn store(&self) -> CouchStore {
        CouchStore::connect(self.config()).await.expect("connect to mock server")
    }

    /// Answers the next `times` requests with `status` and no body.
    pub fn fail_next(&self, status: StatusCode, times: usize) {
        let mut state = self.state.lock();
        state.failures.extend(std::iter::repeat_n(status, times));
    }

    /// Every request served so far, as method and path.
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.state.lock().requests.clone()
    }

    /// Number of requests served with `method`.
    pub fn request_count(&self, method: &Method) -> usize {
        self.state.lock().requests.iter().filter(|(m, _)| m == method).count()
    }

    /// Forgets the request log.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Whether `db` exists.
    pub fn has_database(&self, db: &str) -> bool {
        self.state.lock().databases.contains_key(db)
    }

    /// Stored body of `id`, without `_id` and `_rev`.
    pub fn document(&self, db: &str, id: &str) -> Option<Map<String, Value>> {
        self.state.lock().databases.get(db)?.get(id).map(|doc| doc.body.clone())
    }

    /// Current revision of `id`.
    pub fn revision(&self, db: &str, id: &str) -> Option<String> {
        self.state.lock().databases.get(db)?.get(id).map(|doc| doc.rev.clone())
    }

    /// Writes `body` as another client would, bumping the revision without
    /// any check. Returns the new revision.
    pub fn write_behind(&self, db: &str, id: &str, body: Value) -> Option<String> {
        let Value::Object(body) = body else { return None };
        self.state.lock().write(db, id, body)
    }

    /// Stops serving.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn record_and_inject(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let injected = {
        let mut state = state.lock();
        state.requests.push((request.method().clone(), request.uri().path().to_owned()));
        state.failures.pop_front()
    };
    match injected {
        Some(status) => status.into_response(),
        None => next.run(request).await,
    }
}

fn not_found(reason: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not_found", "reason": reason}))).into_response()
}

fn conflict() -> Response {
    (StatusCode::CONFLICT, Json(json!({"error": "conflict", "reason": "Document update conflict."}))).into_response()
}

fn with_etag(status: StatusCode, rev: &str, body: Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{rev}\"")) {
        response.headers_mut().insert(ETAG, value);
    }
    response
}

async fn create_database(State(state): State<Shared>, Path(db): Path<String>) -> Response {
    let mut state = state.lock();
    if state.databases.contains_key(&db) {
        return (StatusCode::PRECONDITION_FAILED, Json(json!({"error": "file_exists"}))).into_response();
    }
    state.databases.insert(db, BTreeMap::new());
    (StatusCode::CREATED, Json(json!({"ok": true}))).into_response()
}

async fn drop_database(State(state): State<Shared>, Path(db): Path<String>) -> Response {
    match state.lock().databases.remove(&db) {
        Some(_) => Json(json!({"ok": true})).into_response(),
        None => not_found("Database does not exist."),
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    limit: Option<usize>,
    skip: Option<usize>,
}

async fn all_docs(State(state): State<Shared>, Path(db): Path<String>, Query(page): Query<Page>) -> Response {
    let state = state.lock();
    let Some(docs) = state.databases.get(&db) else { return not_found("Database does not exist.") };
    let skip = page.skip.unwrap_or(0);
    let rows: Vec<Value> = docs
        .iter()
        .skip(skip)
        .take(page.limit.unwrap_or(usize::MAX))
        .map(|(id, doc)| json!({"id": id, "key": id, "value": {"rev": doc.rev}}))
        .collect();
    Json(json!({"total_rows": docs.len(), "offset": skip, "rows": rows})).into_response()
}

async fn get_document(State(state): State<Shared>, Path((db, id)): Path<(String, String)>) -> Response {
    let state = state.lock();
    let Some(doc) = state.databases.get(&db).and_then(|docs| docs.get(&id)) else {
        return not_found("missing");
    };
    let mut body = doc.body.clone();
    body.insert("_id".into(), Value::String(id));
    body.insert("_rev".into(), Value::String(doc.rev.clone()));
    with_etag(StatusCode::OK, &doc.rev, Value::Object(body))
}

async fn put_document(
    State(state): State<Shared>,
    Path((db, id)): Path<(String, String)>,
    Json(body): Json<Map<String, Value>>,
) -> Response {
    let mut state = state.lock();
    let Some(docs) = state.databases.get(&db) else { return not_found("Database does not exist.") };
    let presented = body.get("_rev").and_then(Value::as_str);
    let current = docs.get(&id).map(|doc| doc.rev.as_str());
    if presented != current {
        return conflict();
    }
    match state.write(&db, &id, body) {
        Some(rev) => with_etag(StatusCode::CREATED, &rev, json!({"ok": true, "id": id, "rev": rev})),
        None => not_found("Database does not exist."),
    }
}

#[derive(Debug, Deserialize)]
struct Revision {
    rev: Option<String>,
}

async fn delete_document(
    State(state): State<Shared>,
    Path((db, id)): Path<(String, String)>,
    Query(query): Query<Revision>,
) -> Response {
    let mut state = state.lock();
    let generation = {
        let Some(doc) = state.databases.get(&db).and_then(|docs| docs.get(&id)) else {
            return not_found("deleted");
        };
        if query.rev.as_deref() != Some(doc.rev.as_str()) {
            return conflict();
        }
        doc.generation + 1
    };
    let rev = state.next_rev(generation);
    if let Some(docs) = state.databases.get_mut(&db) {
        docs.remove(&id);
    }
    with_etag(StatusCode::OK, &rev, json!({"ok": true, "id": id, "rev": rev}))
}
