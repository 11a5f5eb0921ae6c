//! ORM-style adapter for the kvbridge key-value contract.
//!
//! [`OrmStore`] works against a [`Relation`] (table plus key and value
//! columns) instead of hand-written SQL, resolves its connection through a
//! process-wide [`ConnectionRegistry`], and provisions its table under a
//! process-wide lock so racing stores issue the DDL once.
//!
//! The hard operations use the detect-then-recover protocol:
//!
//! - `create`: plain insert; a uniqueness violation means `false`
//! - `increment`: blind insert of the amount; on a uniqueness violation, a
//!   transaction validates the stored integer, adds under a row lock and
//!   requires one updated row, retried on conflict
//! - `delete`: locked read, then delete, in one transaction

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod registry;
pub mod relation;
pub mod store;
pub mod table;

pub use config::{ConnectionSource, OrmStoreConfig};
pub use error::{OrmError, OrmResult};
pub use registry::{ConnectionRegistry, ConnectionSpec, Connector, SqliteConnector};
pub use relation::{Assignment, Delete, Insert, Relation, Select, Statement, Update};
pub use store::OrmStore;
pub use table::{CreateTableHook, TableProvisioning, create_table_if_not_exists};
