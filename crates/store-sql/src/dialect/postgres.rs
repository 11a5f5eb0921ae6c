use kvbridge_store::{StoreError, StoreResult};

use super::{Dialect, Statements, checked_sum};
use crate::connection::{SqlConnection, SqlValue, transaction};

/// PostgreSQL: `ON CONFLICT` upserts and `RETURNING`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {} (k BYTEA NOT NULL PRIMARY KEY, v BYTEA)", self.quote(table))
    }

    fn store(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
        value: &[u8],
    ) -> StoreResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (k, v) VALUES ($1, $2) ON CONFLICT (k) DO UPDATE SET v = excluded.v",
                sql.table
            ),
            &[SqlValue::from(key), SqlValue::from(value)],
        )?;
        Ok(())
    }

    /// `BYTEA` has no arithmetic, so the sum is computed under the row lock
    /// and written back as decimal text. A missing row is inserted; losing
    /// that race to another writer surfaces as a conflict.
    fn increment(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
        amount: i64,
    ) -> StoreResult<i64> {
        transaction(conn, |tx| {
            let locking = sql.locking_load(tx);
            let Some(existing) = tx.query_scalar(&locking, &[SqlValue::from(key)])? else {
                tx.execute(&sql.insert, &[SqlValue::from(key), decimal(amount)])?;
                return Ok(amount);
            };
            let next = checked_sum(&existing, amount)?;
            if tx.execute(&sql.update, &[decimal(next), SqlValue::from(key)])? != 1 {
                return Err(StoreError::conflict("no row updated"));
            }
            Ok(next)
        })
    }

    fn delete(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
    ) -> StoreResult<Option<SqlValue>> {
        let returning = format!("{} RETURNING v", sql.delete);
        Ok(conn.query_scalar(&returning, &[SqlValue::from(key)])?)
    }
}

fn decimal(n: i64) -> SqlValue {
    SqlValue::Blob(n.to_string().into_bytes())
}
