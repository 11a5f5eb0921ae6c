//! Configuration for [`SqlStore`](crate::SqlStore).

use kvbridge_store::{ConfigError, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::dialect::DialectKind;

/// Default table name.
pub const DEFAULT_TABLE: &str = "kvbridge";

/// Default number of keys fetched per `each_key` page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Configuration for [`SqlStore`](crate::SqlStore).
///
/// # Example
///
/// ```
/// use kvbridge_store_sql::{DialectKind, SqlStoreConfig};
///
/// let config = SqlStoreConfig::builder()
///     .table("sessions")
///     .dialect(DialectKind::Generic)
///     .build()?;
/// assert_eq!(config.table(), "sessions");
/// # Ok::<(), kvbridge_store::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlStoreConfig {
    /// Table holding the `(k, v)` pairs.
    #[serde(default = "default_table")]
    pub(crate) table: String,

    /// Retries for increment races.
    #[serde(default = "RetryPolicy::increments")]
    pub(crate) increment_retry: RetryPolicy,

    /// Retries for the update-then-insert store fallback.
    #[serde(default = "RetryPolicy::writes")]
    pub(crate) write_retry: RetryPolicy,

    /// Keys per `each_key` page.
    #[serde(default = "default_page_size")]
    pub(crate) page_size: usize,

    /// Dialect override; derived from the pool's database kind when unset.
    #[serde(default)]
    pub(crate) dialect: Option<DialectKind>,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_owned()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for SqlStoreConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            increment_retry: RetryPolicy::increments(),
            write_retry: RetryPolicy::writes(),
            page_size: DEFAULT_PAGE_SIZE,
            dialect: None,
        }
    }
}

#[bon::bon]
impl SqlStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the table name is empty or `page_size` is
    /// zero.
    #[builder]
    pub fn new(
        #[builder(into, default = DEFAULT_TABLE.to_owned())] table: String,
        #[builder(default = RetryPolicy::increments())] increment_retry: RetryPolicy,
        #[builder(default = RetryPolicy::writes())] write_retry: RetryPolicy,
        #[builder(default = DEFAULT_PAGE_SIZE)] page_size: usize,
        dialect: Option<DialectKind>,
    ) -> Result<Self, ConfigError> {
        let config = Self { table, increment_retry, write_retry, page_size, dialect };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the invariants enforced by the builder; useful after
    /// deserializing.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.is_empty() {
            return Err(ConfigError::Empty { field: "table" });
        }
        if self.page_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "page_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Increment retry policy.
    #[must_use]
    pub fn increment_retry(&self) -> RetryPolicy {
        self.increment_retry
    }

    /// Store retry policy.
    #[must_use]
    pub fn write_retry(&self) -> RetryPolicy {
        self.write_retry
    }

    /// Keys per `each_key` page.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Dialect override.
    #[must_use]
    pub fn dialect(&self) -> Option<DialectKind> {
        self.dialect
    }
}
