use kvbridge_store::StoreResult;

use super::{Dialect, Statements};
use crate::connection::{SqlConnection, SqlValue};

/// SQLite: single-statement store via `INSERT OR REPLACE`.
///
/// Increment and delete keep the generic strategy; under `BEGIN IMMEDIATE`
/// the locked read is already exclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn store(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
        value: &[u8],
    ) -> StoreResult<()> {
        conn.execute(
            &format!("INSERT OR REPLACE INTO {} (k, v) VALUES (?1, ?2)", sql.table),
            &[SqlValue::from(key), SqlValue::from(value)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{ConnectionPool, SqlitePool};

    #[test]
    fn replace_overwrites_in_one_statement() {
        let pool = SqlitePool::memory().unwrap();
        let mut conn = pool.acquire().unwrap();
        conn.execute_batch(&Sqlite.create_table_sql("kv")).unwrap();
        let sql = Statements::new(&Sqlite, "kv", 10);
        assert_eq!(sql.load, "SELECT v FROM \"kv\" WHERE k = ?1");

        Sqlite.store(conn.as_mut(), &sql, b"k", b"a").unwrap();
        Sqlite.store(conn.as_mut(), &sql, b"k", b"b").unwrap();
        assert_eq!(
            conn.query_column("SELECT v FROM kv", &[]).unwrap(),
            vec![SqlValue::Blob(b"b".to_vec())]
        );
    }
}
