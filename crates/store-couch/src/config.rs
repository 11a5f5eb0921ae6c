//! Configuration for [`CouchStore`](crate::CouchStore).

use std::time::Duration;

use kvbridge_store::{ConfigError, RetryPolicy};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 5984;

/// Default database name.
pub const DEFAULT_DATABASE: &str = "kvbridge";

/// Default document field holding scalar values.
pub const DEFAULT_VALUE_FIELD: &str = "value";

/// Default document field holding the type tag.
pub const DEFAULT_TYPE_FIELD: &str = "type";

/// Default number of rows fetched per `_all_docs` page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of cached revision tokens.
pub const DEFAULT_REVISION_CACHE_CAPACITY: u64 = 10_000;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the database lives and how documents are laid out.
///
/// # Example
///
/// ```
/// use kvbridge_store_couch::CouchConfig;
///
/// let config = CouchConfig::builder().host("couch.internal").database("sessions").build()?;
/// assert_eq!(config.database_url()?.as_str(), "http://couch.internal:5984/sessions");
/// # Ok::<(), kvbridge_store::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CouchConfig {
    #[serde(default = "default_host")]
    pub(crate) host: String,

    #[serde(default = "default_port")]
    pub(crate) port: u16,

    #[serde(default = "default_database")]
    pub(crate) database: String,

    /// Field holding string and number payloads.
    #[serde(default = "default_value_field")]
    pub(crate) value_field: String,

    /// Field holding the `String` / `Number` / `Hash` tag.
    #[serde(default = "default_type_field")]
    pub(crate) type_field: String,

    #[serde(default = "default_page_size")]
    pub(crate) page_size: usize,

    #[serde(default = "default_revision_cache_capacity")]
    pub(crate) revision_cache_capacity: u64,

    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,

    /// Retries for stale revisions and transport faults on writes.
    #[serde(default = "RetryPolicy::writes")]
    pub(crate) write_retry: RetryPolicy,
}

fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_owned()
}

fn default_value_field() -> String {
    DEFAULT_VALUE_FIELD.to_owned()
}

fn default_type_field() -> String {
    DEFAULT_TYPE_FIELD.to_owned()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_revision_cache_capacity() -> u64 {
    DEFAULT_REVISION_CACHE_CAPACITY
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl Default for CouchConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            database: default_database(),
            value_field: default_value_field(),
            type_field: default_type_field(),
            page_size: DEFAULT_PAGE_SIZE,
            revision_cache_capacity: DEFAULT_REVISION_CACHE_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            write_retry: RetryPolicy::writes(),
        }
    }
}

#[bon::bon]
impl CouchConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the host or a field name is empty, the
    /// database name is not a legal database name, the value and type fields
    /// coincide or start with `_`, or a size is zero.
    #[builder]
    pub fn new(
        #[builder(into, default = default_host())] host: String,
        #[builder(default = DEFAULT_PORT)] port: u16,
        #[builder(into, default = default_database())] database: String,
        #[builder(into, default = default_value_field())] value_field: String,
        #[builder(into, default = default_type_field())] type_field: String,
        #[builder(default = DEFAULT_PAGE_SIZE)] page_size: usize,
        #[builder(default = DEFAULT_REVISION_CACHE_CAPACITY)] revision_cache_capacity: u64,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
        #[builder(default = RetryPolicy::writes())] write_retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            host,
            port,
            database,
            value_field,
            type_field,
            page_size,
            revision_cache_capacity,
            request_timeout,
            write_retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the builder's invariants, e.g. after deserializing.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Empty { field: "host" });
        }
        validate_database_name(&self.database)?;
        for (field, value) in [("value_field", &self.value_field), ("type_field", &self.type_field)] {
            if value.is_empty() {
                return Err(ConfigError::Empty { field });
            }
            if value.starts_with('_') {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("{value:?} collides with reserved document fields"),
                });
            }
        }
        if self.value_field == self.type_field {
            return Err(ConfigError::Invalid { field: "type_field", message: "must differ from value_field".into() });
        }
        if self.page_size == 0 {
            return Err(ConfigError::BelowMinimum { field: "page_size", min: "1".into(), value: "0".into() });
        }
        if self.revision_cache_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "revision_cache_capacity",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum { field: "request_timeout", min: "1ms".into(), value: "0s".into() });
        }
        Ok(())
    }

    /// URL of the database, without a trailing slash.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when host and port do not form a URL.
    pub fn database_url(&self) -> Result<Url, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid { field: "host", message };
        let mut url = Url::parse(&format!("http://{}:{}", self.host, self.port))
            .map_err(|err| invalid(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid(format!("{:?} cannot carry a path", self.host)))?
            .pop_if_empty()
            .push(&self.database);
        Ok(url)
    }

    /// Database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Field holding scalar payloads.
    #[must_use]
    pub fn value_field(&self) -> &str {
        &self.value_field
    }

    /// Field holding the type tag.
    #[must_use]
    pub fn type_field(&self) -> &str {
        &self.type_field
    }

    /// Per-request timeout applied by [`CouchStore::connect`](crate::CouchStore::connect).
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Database names start with a lowercase letter and continue with lowercase
/// letters, digits or any of `_$()+-/`.
fn validate_database_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(ConfigError::Empty { field: "database" });
    };
    let legal = first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+-/".contains(c));
    if legal {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field: "database", message: format!("{name:?} is not a legal database name") })
    }
}
