//! Per-dialect write strategies.
//!
//! [`Dialect`] carries the generic detect-then-recover strategy in its
//! default methods. Dialects with a better single-statement primitive
//! (upsert clauses, `RETURNING`) override only the affected operation and
//! inherit the rest.
//!
//! Every method here is a single attempt. A lost race surfaces as
//! [`StoreError::Conflict`]; the store wraps attempts in the retry policy.

mod mysql;
mod postgres;
mod sqlite;

use std::{fmt, sync::Arc};

use kvbridge_store::{StoreError, StoreResult};

pub use self::{mysql::MySql, postgres::Postgres, sqlite::Sqlite};
use crate::connection::{DatabaseKind, SqlConnection, SqlValue, transaction};

/// Statement texts shared by every dialect, rendered once per store.
#[derive(Debug, Clone)]
pub struct Statements {
    /// Quoted table name.
    pub table: String,
    /// `SELECT 1 ... WHERE k = ?`
    pub exists: String,
    /// `SELECT v ... WHERE k = ?`
    pub load: String,
    /// `INSERT (k, v)`
    pub insert: String,
    /// `UPDATE SET v = ? WHERE k = ?`
    pub update: String,
    /// `UPDATE SET v = v + ? WHERE k = ?`
    pub add: String,
    /// `DELETE ... WHERE k = ?`
    pub delete: String,
    /// `DELETE` without a filter.
    pub clear: String,
    /// First page of keys in order.
    pub first_keys: String,
    /// Next page of keys after a given key.
    pub next_keys: String,
}

impl Statements {
    /// Renders the shared statements for `table` in `dialect`.
    pub fn new(dialect: &dyn Dialect, table: &str, page_size: usize) -> Self {
        let t = dialect.quote(table);
        let p1 = dialect.placeholder(1);
        let p2 = dialect.placeholder(2);
        Self {
            exists: format!("SELECT 1 FROM {t} WHERE k = {p1}"),
            load: format!("SELECT v FROM {t} WHERE k = {p1}"),
            insert: format!("INSERT INTO {t} (k, v) VALUES ({p1}, {p2})"),
            update: format!("UPDATE {t} SET v = {p1} WHERE k = {p2}"),
            add: format!("UPDATE {t} SET v = v + {p1} WHERE k = {p2}"),
            delete: format!("DELETE FROM {t} WHERE k = {p1}"),
            clear: format!("DELETE FROM {t}"),
            first_keys: format!("SELECT k FROM {t} ORDER BY k LIMIT {page_size}"),
            next_keys: format!("SELECT k FROM {t} WHERE k > {p1} ORDER BY k LIMIT {page_size}"),
            table: t,
        }
    }

    /// `load` with the connection's row-lock clause appended.
    pub fn locking_load(&self, conn: &dyn SqlConnection) -> String {
        format!("{}{}", self.load, conn.row_lock_clause())
    }
}

/// SQL dialect: statement rendering plus the write strategies for `store`,
/// `increment` and `delete`.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Bind placeholder for the `index`th (1-based) parameter.
    fn placeholder(&self, index: usize) -> String {
        let _ = index;
        "?".to_owned()
    }

    /// Quotes an identifier.
    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// DDL creating the key-value table if it does not exist.
    fn create_table_sql(&self, table: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {} (k BLOB NOT NULL PRIMARY KEY, v BLOB)", self.quote(table))
    }

    /// Unconditional write: update, then insert when no row matched.
    ///
    /// The insert can collide with a concurrent writer; that surfaces as a
    /// conflict.
    fn store(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
        value: &[u8],
    ) -> StoreResult<()> {
        let updated = conn.execute(&sql.update, &[SqlValue::from(value), SqlValue::from(key)])?;
        if updated == 0 {
            conn.execute(&sql.insert, &[SqlValue::from(key), SqlValue::from(value)])?;
        }
        Ok(())
    }

    /// Integer add: blind insert of `amount`; on a uniqueness violation,
    /// validate and add inside a transaction, requiring exactly one updated
    /// row.
    fn increment(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
        amount: i64,
    ) -> StoreResult<i64> {
        match conn.execute(&sql.insert, &[SqlValue::from(key), SqlValue::Integer(amount)]) {
            Ok(_) => return Ok(amount),
            Err(err) if err.is_unique_violation() => {},
            Err(err) => return Err(err.into()),
        }
        transaction(conn, |tx| {
            let locking = sql.locking_load(tx);
            if let Some(existing) = tx.query_scalar(&locking, &[SqlValue::from(key)])? {
                checked_sum(&existing, amount)?;
            }
            if tx.execute(&sql.add, &[SqlValue::Integer(amount), SqlValue::from(key)])? != 1 {
                return Err(StoreError::conflict("no row updated"));
            }
            read_integer(tx, &sql.load, key)
        })
    }

    /// Locked read of the prior value followed by the delete.
    fn delete(
        &self,
        conn: &mut dyn SqlConnection,
        sql: &Statements,
        key: &[u8],
    ) -> StoreResult<Option<SqlValue>> {
        transaction(conn, |tx| {
            let locking = sql.locking_load(tx);
            let prior = tx.query_scalar(&locking, &[SqlValue::from(key)])?;
            if prior.is_some() {
                tx.execute(&sql.delete, &[SqlValue::from(key)])?;
            }
            Ok(prior)
        })
    }
}

/// Fallback strategy for databases without a specialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generic;

impl Dialect for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }
}

/// Which dialect a store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// [`Generic`]
    Generic,
    /// [`Sqlite`]
    Sqlite,
    /// [`Postgres`]
    Postgres,
    /// [`MySql`]
    Mysql,
}

impl DialectKind {
    /// The dialect a database product gets when none is configured.
    pub fn for_database(kind: DatabaseKind) -> Self {
        match kind {
            DatabaseKind::Sqlite => Self::Sqlite,
            DatabaseKind::Postgres => Self::Postgres,
            DatabaseKind::Mysql => Self::Mysql,
            DatabaseKind::Other => Self::Generic,
        }
    }

    /// Instantiates the dialect.
    pub fn build(self) -> Arc<dyn Dialect> {
        match self {
            Self::Generic => Arc::new(Generic),
            Self::Sqlite => Arc::new(Sqlite),
            Self::Postgres => Arc::new(Postgres),
            Self::Mysql => Arc::new(MySql),
        }
    }
}

/// Validates a stored value as an integer and adds `amount` to it.
pub(crate) fn checked_sum(existing: &SqlValue, amount: i64) -> StoreResult<i64> {
    let current = existing
        .as_integer()
        .map_err(|_| StoreError::type_mismatch(format!("stored value is not an integer: {existing:?}")))?;
    current
        .checked_add(amount)
        .ok_or_else(|| StoreError::type_mismatch("increment overflows a 64-bit integer"))
}

/// Reads the value at `key` back as an integer.
pub(crate) fn read_integer(conn: &mut dyn SqlConnection, load: &str, key: &[u8]) -> StoreResult<i64> {
    let value = conn
        .query_scalar(load, &[SqlValue::from(key)])?
        .ok_or_else(|| StoreError::conflict("row vanished before read-back"))?;
    integer_result(&value)
}

pub(crate) fn integer_result(value: &SqlValue) -> StoreResult<i64> {
    value
        .as_integer()
        .map_err(|_| StoreError::type_mismatch(format!("incremented value is not an integer: {value:?}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{ConnectionPool, SqlitePool};

    fn setup(dialect: &dyn Dialect) -> (SqlitePool, Statements) {
        let pool = SqlitePool::memory().unwrap();
        pool.acquire().unwrap().execute_batch(&dialect.create_table_sql("kv")).unwrap();
        (pool, Statements::new(dialect, "kv", 100))
    }

    #[test]
    fn generic_statements_use_positional_placeholders() {
        let sql = Statements::new(&Generic, "kv", 50);
        assert_eq!(sql.table, "\"kv\"");
        assert_eq!(sql.update, "UPDATE \"kv\" SET v = ? WHERE k = ?");
        assert_eq!(sql.next_keys, "SELECT k FROM \"kv\" WHERE k > ? ORDER BY k LIMIT 50");
    }

    #[test]
    fn quote_escapes_embedded_quotes() {
        assert_eq!(Generic.quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn generic_store_inserts_then_updates() {
        let (pool, sql) = setup(&Generic);
        let mut conn = pool.acquire().unwrap();
        Generic.store(conn.as_mut(), &sql, b"k", b"one").unwrap();
        Generic.store(conn.as_mut(), &sql, b"k", b"two").unwrap();
        let value = conn.query_scalar(&sql.load, &[SqlValue::from(&b"k"[..])]).unwrap();
        assert_eq!(value, Some(SqlValue::Blob(b"two".to_vec())));
    }

    #[test]
    fn generic_increment_takes_both_paths() {
        let (pool, sql) = setup(&Generic);
        let mut conn = pool.acquire().unwrap();
        assert_eq!(Generic.increment(conn.as_mut(), &sql, b"n", 5).unwrap(), 5);
        assert_eq!(Generic.increment(conn.as_mut(), &sql, b"n", -2).unwrap(), 3);
    }

    #[test]
    fn generic_increment_accepts_stored_decimal_text() {
        let (pool, sql) = setup(&Generic);
        let mut conn = pool.acquire().unwrap();
        Generic.store(conn.as_mut(), &sql, b"n", b"40").unwrap();
        assert_eq!(Generic.increment(conn.as_mut(), &sql, b"n", 2).unwrap(), 42);
    }

    #[test]
    fn generic_increment_rejects_non_integer_without_writing() {
        let (pool, sql) = setup(&Generic);
        let mut conn = pool.acquire().unwrap();
        Generic.store(conn.as_mut(), &sql, b"w", b"abc").unwrap();
        let err = Generic.increment(conn.as_mut(), &sql, b"w", 1).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }), "got {err:?}");
        let value = conn.query_scalar(&sql.load, &[SqlValue::from(&b"w"[..])]).unwrap();
        assert_eq!(value, Some(SqlValue::Blob(b"abc".to_vec())));
    }

    #[test]
    fn generic_delete_returns_prior_once() {
        let (pool, sql) = setup(&Generic);
        let mut conn = pool.acquire().unwrap();
        Generic.store(conn.as_mut(), &sql, b"k", b"v").unwrap();
        assert_eq!(
            Generic.delete(conn.as_mut(), &sql, b"k").unwrap(),
            Some(SqlValue::Blob(b"v".to_vec()))
        );
        assert_eq!(Generic.delete(conn.as_mut(), &sql, b"k").unwrap(), None);
    }

    #[test]
    fn database_kind_selects_dialect() {
        assert_eq!(DialectKind::for_database(DatabaseKind::Sqlite).build().name(), "sqlite");
        assert_eq!(DialectKind::for_database(DatabaseKind::Postgres).build().name(), "postgres");
        assert_eq!(DialectKind::for_database(DatabaseKind::Mysql).build().name(), "mysql");
        assert_eq!(DialectKind::for_database(DatabaseKind::Other).build().name(), "generic");
    }

    #[test]
    fn overflow_is_type_mismatch() {
        let err = checked_sum(&SqlValue::Integer(i64::MAX), 1).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }
}
