//! Revision-token cache.
//!
//! Writes to an existing document must present its current revision. The
//! cache remembers the last token seen for each key so a `store` can usually
//! skip the `HEAD` round trip. Entries are hints: a stale one costs a `409`
//! and a retry, never a wrong result.

use moka::future::Cache;
use reqwest::{StatusCode, header::HeaderMap};
use tracing::trace;

/// Bounded, thread-safe map from document id to revision token.
#[derive(Clone)]
pub struct RevisionCache {
    entries: Cache<String, String>,
    capacity: u64,
}

impl RevisionCache {
    /// Creates a cache holding at most `capacity` tokens.
    pub fn new(capacity: u64) -> Self {
        Self { entries: Cache::builder().max_capacity(capacity).build(), capacity }
    }

    /// Cached token for `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).await
    }

    /// Remembers `rev` as the current token for `key`.
    pub async fn insert(&self, key: &str, rev: String) {
        self.entries.insert(key.to_owned(), rev).await;
    }

    /// Forgets `key`.
    pub async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    /// Forgets every key.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Maximum number of tokens held.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Records what a document response says about `key`.
    ///
    /// A successful response carrying an `ETag` refreshes the token; anything
    /// else drops it. Returns the token now cached.
    pub async fn observe(&self, key: &str, status: StatusCode, headers: &HeaderMap) -> Option<String> {
        let rev = match status.as_u16() {
            200 | 201 | 202 => etag_revision(headers),
            _ => None,
        };
        match &rev {
            Some(rev) => {
                trace!(key_len = key.len(), "revision cached");
                self.insert(key, rev.clone()).await;
            },
            None => self.remove(key).await,
        }
        rev
    }
}

impl std::fmt::Debug for RevisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionCache")
            .field("entries", &self.entries.entry_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Revision carried by an `ETag` header, with the quotes stripped.
pub fn etag_revision(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(reqwest::header::ETAG)?.to_str().ok()?;
    let rev = raw.trim().trim_start_matches("W/").trim_matches('"');
    (!rev.is_empty()).then(|| rev.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::{ETAG, HeaderValue};

    use super::*;

    fn etag(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn strips_quotes_and_weak_prefix() {
        assert_eq!(etag_revision(&etag("\"1-abc\"")).as_deref(), Some("1-abc"));
        assert_eq!(etag_revision(&etag("W/\"2-def\"")).as_deref(), Some("2-def"));
        assert_eq!(etag_revision(&etag("\"\"")), None);
        assert_eq!(etag_revision(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn success_refreshes_and_failure_forgets() {
        let cache = RevisionCache::new(16);

        let rev = cache.observe("doc", StatusCode::CREATED, &etag("\"1-a\"")).await;
        assert_eq!(rev.as_deref(), Some("1-a"));
        assert_eq!(cache.get("doc").await.as_deref(), Some("1-a"));

        cache.observe("doc", StatusCode::OK, &etag("\"2-b\"")).await;
        assert_eq!(cache.get("doc").await.as_deref(), Some("2-b"));

        assert_eq!(cache.observe("doc", StatusCode::NOT_FOUND, &etag("\"3-c\"")).await, None);
        assert_eq!(cache.get("doc").await, None);
    }

    #[tokio::test]
    async fn conflict_forgets_the_token() {
        let cache = RevisionCache::new(16);
        cache.insert("doc", "1-a".into()).await;
        cache.observe("doc", StatusCode::CONFLICT, &HeaderMap::new()).await;
        assert_eq!(cache.get("doc").await, None);
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let cache = RevisionCache::new(16);
        cache.insert("a", "1-a".into()).await;
        cache.insert("b", "1-b".into()).await;
        cache.clear();
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.capacity(), 16);
    }
}
