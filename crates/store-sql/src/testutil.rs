//! Test doubles for the SQL adapter.
//!
//! Feature-gated behind `testutil`.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use crate::{
    config::SqlStoreConfig,
    connection::{DatabaseKind, SqlConnection, SqlValue},
    error::{SqlError, SqlResult},
    sqlite::SqliteConfig,
    store::SqlStore,
};

/// One statement seen by a [`RecordingConnection`].
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    /// Statement text.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<SqlValue>,
}

/// Connection double that records statements and replays scripted results.
///
/// Used to check the SQL a dialect emits for databases the test suite has no
/// driver for. Unscripted `execute` calls report one affected row; unscripted
/// queries return no rows.
#[derive(Debug, Clone)]
pub struct RecordingConnection {
    kind: DatabaseKind,
    log: Arc<Mutex<Vec<Recorded>>>,
    executes: Arc<Mutex<VecDeque<SqlResult<usize>>>>,
    scalars: Arc<Mutex<VecDeque<Option<SqlValue>>>>,
}

impl RecordingConnection {
    /// A connection reporting `kind`.
    #[must_use]
    pub fn new(kind: DatabaseKind) -> Self {
        Self {
            kind,
            log: Arc::default(),
            executes: Arc::default(),
            scalars: Arc::default(),
        }
    }

    /// Queues the result of the next `execute`.
    #[must_use]
    pub fn then_execute(self, result: SqlResult<usize>) -> Self {
        self.executes.lock().push_back(result);
        self
    }

    /// Queues the result of the next `query_scalar`.
    #[must_use]
    pub fn then_scalar(self, value: Option<SqlValue>) -> Self {
        self.scalars.lock().push_back(value);
        self
    }

    /// Every statement seen so far.
    #[must_use]
    pub fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    /// Statement texts seen so far.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|r| r.sql.clone()).collect()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.log.lock().push(Recorded { sql: sql.to_owned(), params: params.to_vec() });
    }
}

impl SqlConnection for RecordingConnection {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize> {
        self.record(sql, params);
        self.executes.lock().pop_front().unwrap_or(Ok(1))
    }

    fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Option<SqlValue>> {
        self.record(sql, params);
        Ok(self.scalars.lock().pop_front().flatten())
    }

    fn query_column(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<Vec<SqlValue>> {
        self.record(sql, params);
        Ok(self.scalars.lock().pop_front().flatten().into_iter().collect())
    }

    fn execute_batch(&mut self, sql: &str) -> SqlResult<()> {
        self.record(sql, &[]);
        Ok(())
    }

    fn table_exists(&mut self, table: &str) -> SqlResult<bool> {
        self.record("table_exists", &[SqlValue::from(table)]);
        Ok(true)
    }
}

/// A uniqueness violation as a driver would report it.
#[must_use]
pub fn unique_violation() -> SqlError {
    SqlError::UniqueViolation { message: "duplicate key".into() }
}

/// A store over a fresh in-memory SQLite database.
///
/// # Panics
///
/// Panics if the database cannot be opened.
#[allow(clippy::expect_used)]
pub async fn memory_store(config: SqlStoreConfig) -> SqlStore {
    SqlStore::sqlite(SqliteConfig::memory(), config).await.expect("open in-memory sql store")
}
