//! In-memory store implementation.
//!
//! [`MemoryStore`] implements every optional operation natively and serves
//! as the reference behaviour the conformance suite is checked against.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered keys**: Keys live in a [`BTreeMap`], so `each_key` yields them sorted
//! - **Atomic read-modify-write**: `create`, `increment` and `delete` run under the write lock
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use kvbridge_store::{KeyValueStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     assert_eq!(store.increment(b"hits", 2).await.unwrap(), 2);
//!     assert_eq!(store.load(b"hits").await.unwrap(), Some(Bytes::from("2")));
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - `each_key` enumerates a snapshot taken when the stream is created

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;

use crate::{
    backend::{Capabilities, KeyStream, KeyValueStore, failed_key_stream},
    error::{StoreError, StoreResult},
    value::StoreValue,
};

/// In-memory store using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryStore` is cheaply cloneable via [`Arc`]. All clones share the
/// same data and the same closed flag.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) { Err(StoreError::Closed) } else { Ok(()) }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    type Value = Bytes;

    const CAPABILITIES: Capabilities = Capabilities::ALL;

    async fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.data.read().contains_key(key))
    }

    async fn load(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn store(&self, key: &[u8], value: Bytes) -> StoreResult<Bytes> {
        self.ensure_open()?;
        self.data.write().insert(key.to_vec(), value.clone());
        Ok(value)
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.data.write().remove(key))
    }

    async fn create(&self, key: &[u8], value: Bytes) -> StoreResult<bool> {
        self.ensure_open()?;
        let mut data = self.data.write();
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_vec(), value);
        Ok(true)
    }

    async fn increment(&self, key: &[u8], amount: i64) -> StoreResult<i64> {
        self.ensure_open()?;
        let mut data = self.data.write();
        let current = match data.get(key) {
            Some(existing) => existing.to_integer()?,
            None => 0,
        };
        let next = current
            .checked_add(amount)
            .ok_or_else(|| StoreError::type_mismatch("increment overflows a 64-bit integer"))?;
        data.insert(key.to_vec(), Bytes::from_integer(next));
        Ok(next)
    }

    fn each_key(&self) -> KeyStream {
        if let Err(err) = self.ensure_open() {
            return failed_key_stream(err);
        }
        let keys: Vec<Bytes> = self.data.read().keys().map(|k| Bytes::copy_from_slice(k)).collect();
        stream::iter(keys.into_iter().map(Ok)).boxed()
    }

    async fn clear(&self) -> StoreResult<()> {
        self.ensure_open()?;
        self.data.write().clear();
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
