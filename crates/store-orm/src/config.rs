//! Configuration for [`OrmStore`](crate::OrmStore).

use kvbridge_store::{ConfigError, RetryPolicy};
use kvbridge_store_sql::SharedPool;
use serde::{Deserialize, Serialize};

use crate::registry::ConnectionSpec;

/// Default table name.
pub const DEFAULT_TABLE: &str = "kvbridge";

/// Default key column.
pub const DEFAULT_KEY_COLUMN: &str = "k";

/// Default value column.
pub const DEFAULT_VALUE_COLUMN: &str = "v";

/// Default number of keys fetched per `each_key` page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Table layout and retry budgets for [`OrmStore`](crate::OrmStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrmStoreConfig {
    #[serde(default = "default_table")]
    pub(crate) table: String,

    #[serde(default = "default_key_column")]
    pub(crate) key_column: String,

    #[serde(default = "default_value_column")]
    pub(crate) value_column: String,

    #[serde(default = "RetryPolicy::increments")]
    pub(crate) increment_retry: RetryPolicy,

    #[serde(default = "RetryPolicy::writes")]
    pub(crate) write_retry: RetryPolicy,

    #[serde(default = "default_page_size")]
    pub(crate) page_size: usize,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_owned()
}

fn default_key_column() -> String {
    DEFAULT_KEY_COLUMN.to_owned()
}

fn default_value_column() -> String {
    DEFAULT_VALUE_COLUMN.to_owned()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for OrmStoreConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            key_column: default_key_column(),
            value_column: default_value_column(),
            increment_retry: RetryPolicy::increments(),
            write_retry: RetryPolicy::writes(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[bon::bon]
impl OrmStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a name is empty, the key and value columns
    /// coincide, or `page_size` is zero.
    #[builder]
    pub fn new(
        #[builder(into, default = default_table())] table: String,
        #[builder(into, default = default_key_column())] key_column: String,
        #[builder(into, default = default_value_column())] value_column: String,
        #[builder(default = RetryPolicy::increments())] increment_retry: RetryPolicy,
        #[builder(default = RetryPolicy::writes())] write_retry: RetryPolicy,
        #[builder(default = DEFAULT_PAGE_SIZE)] page_size: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { table, key_column, value_column, increment_retry, write_retry, page_size };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the builder's invariants.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in
            [("table", &self.table), ("key_column", &self.key_column), ("value_column", &self.value_column)]
        {
            if value.is_empty() {
                return Err(ConfigError::Empty { field });
            }
        }
        if self.key_column == self.value_column {
            return Err(ConfigError::Invalid {
                field: "value_column",
                message: "must differ from key_column".into(),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::BelowMinimum { field: "page_size", min: "1".into(), value: "0".into() });
        }
        Ok(())
    }

    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Key column name.
    #[must_use]
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Value column name.
    #[must_use]
    pub fn value_column(&self) -> &str {
        &self.value_column
    }
}

/// Where an [`OrmStore`](crate::OrmStore) gets its connections.
#[derive(Debug, Clone, Default)]
pub enum ConnectionSource {
    /// A configuration registered under this name.
    Named(String),
    /// An inline specification, registered under its normalized name.
    Spec(ConnectionSpec),
    /// An existing pool. The store never disconnects it.
    Pool(SharedPool),
    /// The registry's default pool.
    #[default]
    Default,
}

impl From<ConnectionSpec> for ConnectionSource {
    fn from(spec: ConnectionSpec) -> Self {
        Self::Spec(spec)
    }
}

impl From<SharedPool> for ConnectionSource {
    fn from(pool: SharedPool) -> Self {
        Self::Pool(pool)
    }
}
