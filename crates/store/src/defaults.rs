//! Generic fallbacks for optional operations.
//!
//! [`Defaults`] wraps an adapter and declares [`Capability::Create`] and
//! [`Capability::Increment`] whether or not the adapter supports them.
//! Natively supported operations are delegated unchanged; missing ones are
//! synthesized from `exists`, `load` and `store`.
//!
//! The synthesized versions are read-then-write sequences and are **not
//! atomic**: two concurrent fallback `create` calls may both return `true`,
//! and concurrent fallback increments may lose updates. Prefer adapters that
//! declare the capability when that matters.

use async_trait::async_trait;

use crate::{
    backend::{Capabilities, Capability, KeyStream, KeyValueStore, failed_key_stream},
    error::{StoreError, StoreResult},
    value::StoreValue,
};

/// Adapter wrapper that fills in `create` and `increment`.
///
/// ```
/// use bytes::Bytes;
/// use kvbridge_store::{Capability, Defaults, KeyValueStore, MemoryStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = Defaults::new(MemoryStore::new());
/// assert!(<Defaults<MemoryStore> as KeyValueStore>::CAPABILITIES.supports(Capability::Increment));
/// assert_eq!(store.increment(b"n", 3).await.unwrap(), 3);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Defaults<S> {
    inner: S,
}

impl<S: KeyValueStore> Defaults<S> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns the wrapped adapter.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwraps the adapter.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn native(capability: Capability) -> bool {
        S::CAPABILITIES.supports(capability)
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for Defaults<S> {
    type Value = S::Value;

    const CAPABILITIES: Capabilities =
        S::CAPABILITIES.with(Capability::Create).with(Capability::Increment);

    async fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn load(&self, key: &[u8]) -> StoreResult<Option<S::Value>> {
        self.inner.load(key).await
    }

    async fn store(&self, key: &[u8], value: S::Value) -> StoreResult<S::Value> {
        self.inner.store(key, value).await
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<Option<S::Value>> {
        self.inner.delete(key).await
    }

    async fn create(&self, key: &[u8], value: S::Value) -> StoreResult<bool> {
        if Self::native(Capability::Create) {
            return self.inner.create(key, value).await;
        }
        if self.inner.exists(key).await? {
            return Ok(false);
        }
        self.inner.store(key, value).await?;
        Ok(true)
    }

    async fn increment(&self, key: &[u8], amount: i64) -> StoreResult<i64> {
        if Self::native(Capability::Increment) {
            return self.inner.increment(key, amount).await;
        }
        let current = match self.inner.load(key).await? {
            Some(value) => value.to_integer()?,
            None => 0,
        };
        let next = current
            .checked_add(amount)
            .ok_or_else(|| StoreError::type_mismatch("increment overflows a 64-bit integer"))?;
        self.inner.store(key, S::Value::from_integer(next)).await?;
        Ok(next)
    }

    fn each_key(&self) -> KeyStream {
        if Self::native(Capability::EachKey) {
            self.inner.each_key()
        } else {
            failed_key_stream(StoreError::unsupported(Capability::EachKey.name()))
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}
