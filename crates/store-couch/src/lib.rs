//! Document-store adapter for the kvbridge key-value contract.
//!
//! [`CouchStore`] maps keys to documents on a CouchDB-compatible HTTP server.
//! The server's own concurrency control is optimistic: replacing a document
//! requires its current revision token. The adapter caches the last revision
//! seen per key ([`RevisionCache`]) and, when a write is rejected as stale,
//! re-reads the revision and retries.
//!
//! Values are [`DocumentValue`]s: strings, numbers or JSON objects. Objects
//! are stored as the document's own fields; see [`document`] for the layout.
//!
//! # Example
//!
//! ```no_run
//! use kvbridge_store::{Defaults, KeyValueStore};
//! use kvbridge_store_couch::{CouchConfig, CouchStore, DocumentValue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Defaults::new(CouchStore::connect(CouchConfig::builder().database("sessions").build()?).await?);
//!
//! store.store(b"user:1", DocumentValue::from("Ada")).await?;
//! assert_eq!(store.increment(b"visits", 1).await?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables [`testutil::MockCouchServer`].
//! - **`failpoints`**: Activates the `couch-put-document` fail point and the
//!   retry-loop fail points.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use cache::RevisionCache;
pub use config::CouchConfig;
pub use document::{DocumentCodec, DocumentValue};
pub use error::{CouchError, CouchResult};
pub use store::CouchStore;
