//! Key-value store contract.
//!
//! This module defines the [`KeyValueStore`] trait, the uniform capability
//! contract every adapter implements, and [`Capabilities`], the static set of
//! optional operations an adapter performs natively.
//!
//! # Design
//!
//! - **Keys are bytes**: adapters that need textual keys reject the rest with
//!   [`StoreError::InvalidKey`].
//! - **Values are adapter-typed**: [`KeyValueStore::Value`] is `Bytes` for the
//!   SQL adapters and a tagged document value for the document store. Both
//!   implement [`StoreValue`] so `increment` can interpret them as integers.
//! - **Capabilities are static**: they belong to the adapter type, not to an
//!   instance, and decide whether [`Defaults`](crate::Defaults) substitutes
//!   a generic implementation.
//! - **Absence is not an error**: lookups return `Option`.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::{
    StoreError,
    error::StoreResult,
    value::StoreValue,
};

/// Lazy sequence of keys produced by [`KeyValueStore::each_key`].
///
/// Failures surface as stream items; the stream ends after the first error.
pub type KeyStream = BoxStream<'static, StoreResult<Bytes>>;

/// An optional operation an adapter may support natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Insert-if-absent.
    Create,
    /// Atomic integer add.
    Increment,
    /// Key enumeration.
    EachKey,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Self::Create => 1,
            Self::Increment => 1 << 1,
            Self::EachKey => 1 << 2,
        }
    }

    /// Returns the operation name as used in errors and spans.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Increment => "increment",
            Self::EachKey => "each_key",
        }
    }
}

/// Fixed set of [`Capability`] values declared by an adapter type.
///
/// ```
/// use kvbridge_store::{Capabilities, Capability};
///
/// const CAPS: Capabilities = Capabilities::NONE.with(Capability::Create);
/// assert!(CAPS.supports(Capability::Create));
/// assert!(!CAPS.supports(Capability::Increment));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No optional operations.
    pub const NONE: Self = Self(0);

    /// Every optional operation.
    pub const ALL: Self = Self::NONE
        .with(Capability::Create)
        .with(Capability::Increment)
        .with(Capability::EachKey);

    /// Returns a copy with `capability` added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns `true` if `capability` is in the set.
    #[must_use]
    pub const fn supports(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Iterates over the capabilities in the set.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        [Capability::Create, Capability::Increment, Capability::EachKey]
            .into_iter()
            .filter(move |c| self.supports(*c))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Capability::name)).finish()
    }
}

/// Returns a [`KeyStream`] that yields a single error.
#[must_use]
pub fn failed_key_stream(error: StoreError) -> KeyStream {
    stream::once(async move { Err(error) }).boxed()
}

/// Uniform key-value contract implemented by every adapter.
///
/// Implementations are thread-safe (`Send + Sync`); a single instance may be
/// shared between tasks. Atomicity guarantees come from the backend (unique
/// constraints, row locks, upsert statements, revision tokens), never from
/// locks held inside the adapter.
///
/// # Operations
///
/// | Method | Capability | Description |
/// |--------|------------|-------------|
/// | [`exists`](KeyValueStore::exists) | always | presence test |
/// | [`load`](KeyValueStore::load) | always | fetch a value |
/// | [`store`](KeyValueStore::store) | always | unconditional upsert |
/// | [`delete`](KeyValueStore::delete) | always | remove and return the prior value |
/// | [`create`](KeyValueStore::create) | [`Capability::Create`] | insert-if-absent |
/// | [`increment`](KeyValueStore::increment) | [`Capability::Increment`] | atomic integer add |
/// | [`each_key`](KeyValueStore::each_key) | [`Capability::EachKey`] | lazy key enumeration |
/// | [`clear`](KeyValueStore::clear) | always | remove every entry |
/// | [`close`](KeyValueStore::close) | always | release resources |
///
/// Optional operations default to [`StoreError::Unsupported`].
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use kvbridge_store::{KeyValueStore, MemoryStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
///
/// store.store(b"k", Bytes::from("v")).await.unwrap();
/// assert_eq!(store.load(b"k").await.unwrap(), Some(Bytes::from("v")));
/// assert!(!store.create(b"k", Bytes::from("other")).await.unwrap());
/// # });
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value type accepted and returned by this adapter.
    type Value: StoreValue;

    /// Optional operations this adapter performs natively.
    const CAPABILITIES: Capabilities;

    /// Returns `true` if `key` is present.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn exists(&self, key: &[u8]) -> StoreResult<bool>;

    /// Returns the value for `key`, or `None` when absent.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn load(&self, key: &[u8]) -> StoreResult<Option<Self::Value>>;

    /// Unconditionally sets `key` to `value` and returns the stored value.
    ///
    /// After success, `load(key)` returns `value` until another write.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn store(&self, key: &[u8], value: Self::Value) -> StoreResult<Self::Value>;

    /// Removes `key` and returns the value it held, or `None` when absent.
    ///
    /// Under concurrent deletes of the same key at most one caller observes
    /// the prior value.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StoreResult<Option<Self::Value>>;

    /// Inserts `value` only if `key` is absent.
    ///
    /// Returns `true` if this call inserted the entry. Among concurrent
    /// `create` calls on an absent key exactly one returns `true`.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn create(&self, key: &[u8], value: Self::Value) -> StoreResult<bool> {
        let _ = (key, value);
        Err(StoreError::unsupported(Capability::Create.name()))
    }

    /// Adds `amount` to the integer at `key`, treating an absent key as 0,
    /// and returns the new value.
    ///
    /// Fails with [`StoreError::TypeMismatch`] if the existing value is not
    /// an integer. Concurrent increments are never lost.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn increment(&self, key: &[u8], amount: i64) -> StoreResult<i64> {
        let _ = (key, amount);
        Err(StoreError::unsupported(Capability::Increment.name()))
    }

    /// Returns a lazy stream over every key present.
    ///
    /// Order is backend-defined. Keys written during enumeration may or may
    /// not appear.
    fn each_key(&self) -> KeyStream {
        failed_key_stream(StoreError::unsupported(Capability::EachKey.name()))
    }

    /// Removes every entry.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn clear(&self) -> StoreResult<()>;

    /// Releases the adapter's resources. Idempotent.
    ///
    /// Every other operation fails with [`StoreError::Closed`] afterwards.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn close(&self) -> StoreResult<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_composes_in_const_context() {
        const CREATE_ONLY: Capabilities = Capabilities::NONE.with(Capability::Create);
        assert!(CREATE_ONLY.supports(Capability::Create));
        assert!(!CREATE_ONLY.supports(Capability::Increment));
        assert!(!CREATE_ONLY.supports(Capability::EachKey));
        assert_eq!(CREATE_ONLY.iter().collect::<Vec<_>>(), vec![Capability::Create]);
    }

    #[test]
    fn all_contains_everything() {
        assert_eq!(Capabilities::ALL.iter().count(), 3);
        assert_eq!(format!("{:?}", Capabilities::ALL), r#"{"create", "increment", "each_key"}"#);
        assert_eq!(format!("{:?}", Capabilities::NONE), "{}");
    }

    #[tokio::test]
    async fn failed_key_stream_yields_one_error() {
        let items: Vec<_> = failed_key_stream(StoreError::Closed).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(StoreError::Closed)));
    }
}
