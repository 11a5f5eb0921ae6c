//! Document-store adapter.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use futures::{StreamExt, TryStreamExt, stream};
use kvbridge_store::{
    Capabilities, Capability, KeyStream, KeyValueStore, StoreError, StoreResult, failed_key_stream, with_retry,
};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::{
    cache::{RevisionCache, etag_revision},
    config::CouchConfig,
    document::{DocumentCodec, DocumentValue},
    error::CouchError,
};

/// Key-value store over a CouchDB-compatible HTTP document server.
///
/// Every key is a document id. Writes to existing documents present the
/// document's revision; the last revision seen per key is cached, and a stale
/// one is refreshed and the write retried under the configured
/// [`RetryPolicy`](kvbridge_store::RetryPolicy). Write paths also retry
/// transport faults and 5xx responses.
///
/// Keys must be non-empty UTF-8. Ids starting with `_` are reserved by the
/// server.
///
/// `increment` is not native; wrap the store in
/// [`Defaults`](kvbridge_store::Defaults) to get the read-then-write
/// fallback.
pub struct CouchStore {
    client: Client,
    database: Url,
    codec: DocumentCodec,
    revisions: RevisionCache,
    config: CouchConfig,
    closed: Arc<AtomicBool>,
}

/// One page of `GET /{db}/_all_docs`.
#[derive(Debug, Deserialize)]
struct AllDocs {
    total_rows: u64,
    #[serde(default)]
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
    value: AllDocsRevision,
}

#[derive(Debug, Deserialize)]
struct AllDocsRevision {
    rev: String,
}

impl CouchStore {
    /// Connects with a fresh HTTP client honouring the configured request
    /// timeout, and creates the database if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] for an invalid configuration and the
    /// mapped HTTP failure when the database cannot be ensured.
    pub async fn connect(config: CouchConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| StoreError::internal_with_source("failed to build HTTP client", err))?;
        Self::with_client(client, config).await
    }

    /// Like [`connect`](Self::connect), reusing an existing client.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn with_client(client: Client, config: CouchConfig) -> StoreResult<Self> {
        config.validate().map_err(|err| StoreError::internal(err.to_string()))?;
        let database = config.database_url().map_err(|err| StoreError::internal(err.to_string()))?;
        let store = Self {
            client,
            database,
            codec: DocumentCodec::new(config.value_field(), config.type_field()),
            revisions: RevisionCache::new(config.revision_cache_capacity),
            config,
            closed: Arc::new(AtomicBool::new(false)),
        };
        store.ensure_database().await?;
        tracing::debug!(database = store.config.database(), "couch store ready");
        Ok(store)
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &CouchConfig {
        &self.config
    }

    /// Cached revision tokens.
    pub fn revisions(&self) -> &RevisionCache {
        &self.revisions
    }

    fn ensure_open(&self) -> StoreResult<()> {
        ensure_open(&self.closed)
    }

    /// Creates the database; an existing one (`412`) is fine.
    async fn ensure_database(&self) -> StoreResult<()> {
        let response = self.client.put(self.database.clone()).send().await.map_err(CouchError::from)?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                tracing::info!(database = self.config.database(), "created database");
                Ok(())
            },
            StatusCode::PRECONDITION_FAILED => Ok(()),
            status => Err(unexpected(status, Method::PUT, &self.database)),
        }
    }

    fn document_url(&self, id: &str) -> Url {
        let mut url = self.database.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(id);
        }
        url
    }

    /// Current revision of `id`, from the cache or a `HEAD` request.
    async fn revision(&self, id: &str) -> StoreResult<Option<String>> {
        if let Some(rev) = self.revisions.get(id).await {
            return Ok(Some(rev));
        }
        let url = self.document_url(id);
        let response = self.client.head(url.clone()).send().await.map_err(CouchError::from)?;
        let rev = self.revisions.observe(id, response.status(), response.headers()).await;
        match response.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(rev),
            status => Err(unexpected(status, Method::HEAD, &url)),
        }
    }

    async fn put_document(&self, id: &str, value: &DocumentValue) -> StoreResult<()> {
        let rev = self.revision(id).await?;
        let url = self.document_url(id);
        let body = self.codec.encode(value, rev.as_deref())?;

        fail_point!("couch-put-document", |_| Err(StoreError::connection("injected document write failure")));
        let response = self.client.put(url.clone()).json(&body).send().await.map_err(CouchError::from)?;
        let status = response.status();
        self.revisions.observe(id, status, response.headers()).await;
        match status {
            StatusCode::CREATED | StatusCode::ACCEPTED => Ok(()),
            StatusCode::CONFLICT => {
                tracing::debug!(key_len = id.len(), stale = rev.is_some(), "document revision conflict");
                Err(CouchError::status(status, Method::PUT, &url).into())
            },
            status => Err(unexpected(status, Method::PUT, &url)),
        }
    }

    async fn create_document(&self, id: &str, value: &DocumentValue) -> StoreResult<bool> {
        let url = self.document_url(id);
        let body = self.codec.encode(value, None)?;

        fail_point!("couch-put-document", |_| Err(StoreError::connection("injected document write failure")));
        let response = self.client.put(url.clone()).json(&body).send().await.map_err(CouchError::from)?;
        let status = response.status();
        self.revisions.observe(id, status, response.headers()).await;
        match status {
            StatusCode::CREATED | StatusCode::ACCEPTED => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            status => Err(unexpected(status, Method::PUT, &url)),
        }
    }

    /// Fetches the document for its value and revision, then deletes that
    /// revision. A concurrent change surfaces as a conflict.
    async fn delete_document(&self, id: &str) -> StoreResult<Option<DocumentValue>> {
        let url = self.document_url(id);
        let response = self.client.get(url.clone()).send().await.map_err(CouchError::from)?;
        match response.status() {
            StatusCode::OK => {},
            StatusCode::NOT_FOUND => return Ok(None),
            status => return Err(unexpected(status, Method::GET, &url)),
        }
        let etag = etag_revision(response.headers());
        let doc: Map<String, Value> = response.json().await.map_err(CouchError::from)?;
        let rev = etag
            .or_else(|| doc.get("_rev").and_then(Value::as_str).map(str::to_owned))
            .ok_or_else(|| StoreError::serialization("document carries no revision"))?;
        let value = self.codec.decode(doc)?;

        let mut target = url.clone();
        target.query_pairs_mut().append_pair("rev", &rev);
        let response = self.client.delete(target).send().await.map_err(CouchError::from)?;
        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(Some(value)),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => {
                Err(StoreError::conflict(format!("{} changed before delete", url.path())))
            },
            status => Err(unexpected(status, Method::DELETE, &url)),
        }
    }
}

impl std::fmt::Debug for CouchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouchStore")
            .field("database", &self.database.as_str())
            .field("revisions", &self.revisions)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn ensure_open(closed: &AtomicBool) -> StoreResult<()> {
    if closed.load(Ordering::Acquire) { Err(StoreError::Closed) } else { Ok(()) }
}

fn document_id(key: &[u8]) -> StoreResult<&str> {
    if key.is_empty() {
        return Err(StoreError::invalid_key("document ids must not be empty"));
    }
    std::str::from_utf8(key).map_err(|_| StoreError::invalid_key("document ids must be UTF-8"))
}

fn unexpected(status: StatusCode, method: Method, url: &Url) -> StoreError {
    tracing::warn!(%status, %method, path = url.path(), "unexpected response status");
    CouchError::status(status, method, url).into()
}

async fn fetch_page(client: &Client, database: &Url, limit: usize, skip: usize) -> StoreResult<AllDocs> {
    let mut url = database.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.push("_all_docs");
    }
    url.query_pairs_mut().append_pair("limit", &limit.to_string()).append_pair("skip", &skip.to_string());

    let response = client.get(url.clone()).send().await.map_err(CouchError::from)?;
    if response.status() != StatusCode::OK {
        return Err(unexpected(response.status(), Method::GET, &url));
    }
    Ok(response.json().await.map_err(CouchError::from)?)
}

#[async_trait]
impl KeyValueStore for CouchStore {
    type Value = DocumentValue;

    const CAPABILITIES: Capabilities = Capabilities::NONE.with(Capability::Create).with(Capability::EachKey);

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        self.ensure_open()?;
        let id = document_id(key)?;
        let url = self.document_url(id);
        let response = self.client.head(url.clone()).send().await.map_err(CouchError::from)?;
        self.revisions.observe(id, response.status(), response.headers()).await;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected(status, Method::HEAD, &url)),
        }
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn load(&self, key: &[u8]) -> StoreResult<Option<DocumentValue>> {
        self.ensure_open()?;
        let id = document_id(key)?;
        let url = self.document_url(id);
        let response = self.client.get(url.clone()).send().await.map_err(CouchError::from)?;
        self.revisions.observe(id, response.status(), response.headers()).await;
        match response.status() {
            StatusCode::OK => {
                let doc: Map<String, Value> = response.json().await.map_err(CouchError::from)?;
                self.codec.decode(doc).map(Some)
            },
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected(status, Method::GET, &url)),
        }
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len(), tag = value.tag()))]
    async fn store(&self, key: &[u8], value: DocumentValue) -> StoreResult<DocumentValue> {
        self.ensure_open()?;
        let id = document_id(key)?;
        self.codec.check(&value)?;
        with_retry(&self.config.write_retry, "store", || self.put_document(id, &value)).await?;
        Ok(value)
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StoreResult<Option<DocumentValue>> {
        self.ensure_open()?;
        let id = document_id(key)?;
        self.revisions.remove(id).await;
        let prior = with_retry(&self.config.write_retry, "delete", || self.delete_document(id)).await?;
        self.revisions.remove(id).await;
        Ok(prior)
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len(), tag = value.tag()))]
    async fn create(&self, key: &[u8], value: DocumentValue) -> StoreResult<bool> {
        self.ensure_open()?;
        let id = document_id(key)?;
        self.codec.check(&value)?;
        with_retry(&self.config.write_retry, "create", || self.create_document(id, &value)).await
    }

    fn each_key(&self) -> KeyStream {
        if let Err(err) = self.ensure_open() {
            return failed_key_stream(err);
        }
        let client = self.client.clone();
        let database = self.database.clone();
        let revisions = self.revisions.clone();
        let closed = Arc::clone(&self.closed);
        let page_size = self.config.page_size;

        stream::try_unfold(Some(0_usize), move |skip| {
            let client = client.clone();
            let database = database.clone();
            let revisions = revisions.clone();
            let closed = Arc::clone(&closed);
            async move {
                let Some(skip) = skip else { return Ok(None) };
                ensure_open(&closed)?;
                let page = fetch_page(&client, &database, page_size, skip).await?;
                for row in &page.rows {
                    revisions.insert(&row.id, row.value.rev.clone()).await;
                }
                let fetched = skip + page.rows.len();
                let next = (!page.rows.is_empty() && (fetched as u64) < page.total_rows).then_some(fetched);
                let keys: Vec<StoreResult<Bytes>> = page.rows.into_iter().map(|row| Ok(Bytes::from(row.id))).collect();
                Ok::<_, StoreError>(Some((stream::iter(keys), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// Drops and recreates the database.
    #[tracing::instrument(skip(self))]
    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        let response = self.client.delete(self.database.clone()).send().await.map_err(CouchError::from)?;
        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NOT_FOUND => {},
            status => return Err(unexpected(status, Method::DELETE, &self.database)),
        }
        self.revisions.clear();
        self.ensure_database().await
    }

    #[tracing::instrument(skip(self))]
    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.revisions.clear();
        }
        Ok(())
    }
}
