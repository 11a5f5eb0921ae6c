//! Table provisioning.

use std::{fmt, sync::Arc};

use kvbridge_store_sql::{SqlConnection, SqlResult};
use parking_lot::Mutex;

use crate::relation::Relation;

/// Serializes existence-check-then-create across every store in the process.
static TABLE_LOCK: Mutex<()> = Mutex::new(());

/// Custom DDL callback, run with the creating connection.
pub type CreateTableHook = Arc<dyn Fn(&mut dyn SqlConnection, &Relation) -> SqlResult<()> + Send + Sync>;

/// How a store makes sure its table exists.
#[derive(Clone, Default)]
pub enum TableProvisioning {
    /// Create the default layout from [`Relation::create_table`].
    #[default]
    Default,
    /// Run a custom callback.
    Custom(CreateTableHook),
    /// The table is managed elsewhere.
    Skip,
}

impl TableProvisioning {
    /// Wraps a callback.
    pub fn custom(
        hook: impl Fn(&mut dyn SqlConnection, &Relation) -> SqlResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Custom(Arc::new(hook))
    }
}

impl fmt::Debug for TableProvisioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "Default",
            Self::Custom(_) => "Custom(..)",
            Self::Skip => "Skip",
        })
    }
}

/// Creates the relation's table unless it exists.
///
/// Returns `true` if this call created it. The existence check is repeated
/// under the process-wide lock, so concurrent callers issue the DDL at most
/// once.
///
/// # Errors
///
/// Returns the driver error from the existence check or the DDL.
pub fn create_table_if_not_exists(
    conn: &mut dyn SqlConnection,
    relation: &Relation,
    provisioning: &TableProvisioning,
) -> SqlResult<bool> {
    if matches!(provisioning, TableProvisioning::Skip) || conn.table_exists(relation.table())? {
        return Ok(false);
    }
    let _guard = TABLE_LOCK.lock();
    if conn.table_exists(relation.table())? {
        return Ok(false);
    }
    match provisioning {
        TableProvisioning::Custom(hook) => hook(conn, relation)?,
        _ => {
            for ddl in relation.create_table() {
                conn.execute_batch(&ddl)?;
            }
        },
    }
    tracing::info!(table = relation.table(), "created table");
    Ok(true)
}
