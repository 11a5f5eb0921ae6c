//! Uniform key-value contract shared by the kvbridge adapters.
//!
//! This crate provides the [`KeyValueStore`] trait that every adapter
//! implements, the error taxonomy adapters map their failures onto, and the
//! bounded conflict-retry policy that restores atomicity for backends which
//! can only detect a lost race after the fact.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Callers                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │          Defaults<S>  (create / increment fallbacks)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  KeyValueStore trait                        │
//! │  exists load store delete create increment each_key clear   │
//! ├──────────────┬──────────────┬──────────────┬────────────────┤
//! │ MemoryStore  │  SqlStore    │  OrmStore    │  CouchStore    │
//! │ (reference)  │ (store-sql)  │ (store-orm)  │ (store-couch)  │
//! └──────────────┴──────────────┴──────────────┴────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use bytes::Bytes;
//! use kvbridge_store::{KeyValueStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!
//!     assert!(store.create(b"user:1", Bytes::from("Alice")).await?);
//!     assert!(!store.create(b"user:1", Bytes::from("Bob")).await?);
//!     assert_eq!(store.increment(b"visits", 1).await?, 1);
//!     assert_eq!(store.delete(b"user:1").await?, Some(Bytes::from("Alice")));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing an Adapter
//!
//! 1. Implement [`KeyValueStore`], declaring natively supported optional operations in
//!    [`KeyValueStore::CAPABILITIES`]
//! 2. Map backend-specific errors to [`StoreError`]; lost races become [`StoreError::Conflict`]
//! 3. Wrap detect-then-recover sequences in [`with_conflict_retry`]
//! 4. Run the [`conformance`] suite against it
//!
//! See the [`memory`] module source for a reference implementation.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` and `conformance` modules.
//! - **`failpoints`**: Activates `fail` points inside the retry loop.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub mod conformance;
pub mod defaults;
pub mod error;
pub mod memory;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod value;

pub use backend::{Capabilities, Capability, KeyStream, KeyValueStore, failed_key_stream};
pub use defaults::Defaults;
pub use error::{BoxError, ConfigError, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use retry::{
    DEFAULT_INCREMENT_RETRIES, DEFAULT_WRITE_RETRIES, RetryPolicy, with_conflict_retry, with_retry,
};
pub use value::{StoreValue, parse_integer};
