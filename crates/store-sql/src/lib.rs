//! SQL-toolkit adapter for the kvbridge key-value contract.
//!
//! [`SqlStore`] keeps entries in a `(k, v)` table and implements every
//! optional operation natively. How the hard operations are expressed
//! depends on the [`Dialect`]:
//!
//! | Dialect | `store` | `increment` | `delete` |
//! |---------|---------|-------------|----------|
//! | [`Generic`] | update, then insert | insert, then locked add | locked read, then delete |
//! | [`Sqlite`] | `INSERT OR REPLACE` | generic | generic |
//! | [`Postgres`] | `ON CONFLICT DO UPDATE` | locked read, then write decimal text | `DELETE ... RETURNING` |
//! | [`MySql`] | `ON DUPLICATE KEY UPDATE` | upsert, then read | generic |
//!
//! Database access goes through the [`SqlConnection`] and
//! [`ConnectionPool`] traits. [`SqlitePool`] is the bundled driver.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables [`testutil`] (recording connection double and
//!   store factories).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod pool;
pub mod sqlite;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::{DEFAULT_PAGE_SIZE, DEFAULT_TABLE, SqlStoreConfig};
pub use connection::{DatabaseKind, SqlConnection, SqlValue, transaction};
pub use dialect::{Dialect, DialectKind, Generic, MySql, Postgres, Sqlite, Statements};
pub use error::{SqlError, SqlResult};
pub use pool::{ConnectionPool, SharedPool};
pub use sqlite::{JournalMode, SqliteConfig, SqliteConnection, SqlitePool};
pub use store::SqlStore;
