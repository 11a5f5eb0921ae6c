use kvbridge_store::StoreResult;

use super::{Dialect, Statements, checked_sum, read_integer};
use crate::connection::{SqlConnection, SqlValue, transaction};

/// MySQL and MariaDB: `ON DUPLICATE KEY UPDATE` upserts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (k VARBINARY(255) NOT NULL PRIMARY KEY, v LONGBLOB)",
            self.quote(table)
        )
    }

    fn store(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
        value: &[u8],
    ) -> StoreResult<()> {
        conn.execute(
            &format!("{} ON DUPLICATE KEY UPDATE v = VALUES(v)", sql.insert),
            &[SqlValue::from(key), SqlValue::from(value)],
        )?;
        Ok(())
    }

    fn increment(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
        amount: i64,
    ) -> StoreResult<i64> {
        let upsert = format!("{} ON DUPLICATE KEY UPDATE v = v + VALUES(v)", sql.insert);
        transaction(conn, |tx| {
            let locking = sql.locking_load(tx);
            if let Some(existing) = tx.query_scalar(&locking, &[SqlValue::from(key)])? {
                checked_sum(&existing, amount)?;
            }
            tx.execute(&upsert, &[SqlValue::from(key), SqlValue::Integer(amount)])?;
            read_integer(tx, &sql.load, key)
        })
    }
}
