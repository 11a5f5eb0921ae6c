//! Relation abstraction over the key-value table.
//!
//! A [`Relation`] names a table and its key and value columns and renders
//! [`Statement`]s for one database kind. Statements are built by small
//! builders ([`Select`], [`Insert`], [`Update`], [`Delete`]) rather than by
//! string formatting at each call site.
//!
//! ```
//! use kvbridge_store_orm::{Assignment, Relation};
//! use kvbridge_store_sql::{DatabaseKind, SqlValue};
//!
//! let relation = Relation::new("kv", "k", "v", DatabaseKind::Postgres);
//! let stmt = relation.update(Assignment::Value(SqlValue::from("Ada"))).key("name").build();
//! assert_eq!(stmt.sql, r#"UPDATE "kv" SET "v" = $1 WHERE "k" = $2"#);
//! ```

use kvbridge_store_sql::{DatabaseKind, SqlValue};

/// Rendered SQL with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement text.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlValue>,
}

/// Table and column names for one database kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    table: String,
    key_column: String,
    value_column: String,
    kind: DatabaseKind,
}

impl Relation {
    /// Creates a relation.
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        value_column: impl Into<String>,
        kind: DatabaseKind,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            value_column: value_column.into(),
            kind,
        }
    }

    /// Unquoted table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Unquoted key column name.
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Unquoted value column name.
    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    /// Database kind statements are rendered for.
    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// Quotes an identifier for this database kind.
    pub fn quote(&self, ident: &str) -> String {
        match self.kind {
            DatabaseKind::Mysql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self.kind {
            DatabaseKind::Postgres => format!("${index}"),
            _ => "?".to_owned(),
        }
    }

    fn lock_clause(&self) -> &'static str {
        match self.kind {
            DatabaseKind::Sqlite => "",
            _ => " FOR UPDATE",
        }
    }

    /// `SELECT 1`, for presence tests.
    pub fn select_one(&self) -> Select<'_> {
        Select { relation: self, projection: Projection::One, key: None, after: None, limit: None, lock: false }
    }

    /// `SELECT value`.
    pub fn select_value(&self) -> Select<'_> {
        Select { relation: self, projection: Projection::Value, key: None, after: None, limit: None, lock: false }
    }

    /// `SELECT key`, ordered by key.
    pub fn select_keys(&self) -> Select<'_> {
        Select { relation: self, projection: Projection::Key, key: None, after: None, limit: None, lock: false }
    }

    /// `INSERT (key, value)`.
    pub fn insert(&self, key: &str, value: SqlValue) -> Insert<'_> {
        Insert { relation: self, key: key.to_owned(), value }
    }

    /// `UPDATE` with the given value assignment.
    pub fn update(&self, assignment: Assignment) -> Update<'_> {
        Update { relation: self, assignment, key: None }
    }

    /// `DELETE`.
    pub fn delete(&self) -> Delete<'_> {
        Delete { relation: self, key: None }
    }

    /// DDL for the default table layout: textual key with a unique index and
    /// a binary value.
    pub fn create_table(&self) -> Vec<String> {
        let binary = match self.kind {
            DatabaseKind::Postgres => "BYTEA",
            DatabaseKind::Mysql => "LONGBLOB",
            _ => "BLOB",
        };
        let table = self.quote(&self.table);
        let index = self.quote(&format!("index_{}_on_{}", self.table, self.key_column));
        let key = self.quote(&self.key_column);
        vec![
            format!(
                "CREATE TABLE {table} ({key} VARCHAR(255) NOT NULL, {} {binary})",
                self.quote(&self.value_column)
            ),
            format!("CREATE UNIQUE INDEX {index} ON {table} ({key})"),
        ]
    }

    fn where_key(&self, sql: &mut String, next_param: usize) {
        sql.push_str(&format!(" WHERE {} = {}", self.quote(&self.key_column), self.placeholder(next_param)));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    One,
    Key,
    Value,
}

/// `SELECT` builder.
#[derive(Debug, Clone)]
pub struct Select<'r> {
    relation: &'r Relation,
    projection: Projection,
    key: Option<String>,
    after: Option<String>,
    limit: Option<usize>,
    lock: bool,
}

impl Select<'_> {
    /// Restricts to one key.
    #[must_use]
    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_owned());
        self
    }

    /// Restricts to keys greater than `after`.
    #[must_use]
    pub fn after(mut self, after: Option<&str>) -> Self {
        self.after = after.map(str::to_owned);
        self
    }

    /// Caps the number of rows.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Locks the selected rows until the transaction ends.
    #[must_use]
    pub fn lock(mut self) -> Self {
        self.lock = true;
        self
    }

    /// Renders the statement.
    pub fn build(self) -> Statement {
        let r = self.relation;
        let column = match self.projection {
            Projection::One => "1".to_owned(),
            Projection::Key => r.quote(&r.key_column),
            Projection::Value => r.quote(&r.value_column),
        };
        let mut sql = format!("SELECT {column} FROM {}", r.quote(&r.table));
        let mut params = Vec::new();
        if let Some(key) = self.key {
            r.where_key(&mut sql, params.len() + 1);
            params.push(SqlValue::Text(key));
        } else if let Some(after) = self.after {
            sql.push_str(&format!(" WHERE {} > {}", r.quote(&r.key_column), r.placeholder(1)));
            params.push(SqlValue::Text(after));
        }
        if self.projection == Projection::Key {
            sql.push_str(&format!(" ORDER BY {}", r.quote(&r.key_column)));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if self.lock {
            sql.push_str(r.lock_clause());
        }
        Statement { sql, params }
    }
}

/// `INSERT` builder.
#[derive(Debug, Clone)]
pub struct Insert<'r> {
    relation: &'r Relation,
    key: String,
    value: SqlValue,
}

impl Insert<'_> {
    /// Renders the statement.
    pub fn build(self) -> Statement {
        let r = self.relation;
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            r.quote(&r.table),
            r.quote(&r.key_column),
            r.quote(&r.value_column),
            r.placeholder(1),
            r.placeholder(2),
        );
        Statement { sql, params: vec![SqlValue::Text(self.key), self.value] }
    }
}

/// Right-hand side of the value assignment in an `UPDATE`.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `value = ?`
    Value(SqlValue),
    /// `value = value + ?`. On Postgres the `BYTEA` value is converted to
    /// `bigint` and back, since it has no arithmetic of its own.
    Add(i64),
}

/// `UPDATE` builder.
#[derive(Debug, Clone)]
pub struct Update<'r> {
    relation: &'r Relation,
    assignment: Assignment,
    key: Option<String>,
}

impl Update<'_> {
    /// Restricts to one key.
    #[must_use]
    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_owned());
        self
    }

    /// Renders the statement.
    pub fn build(self) -> Statement {
        let r = self.relation;
        let value = r.quote(&r.value_column);
        let p1 = r.placeholder(1);
        let (rhs, param) = match self.assignment {
            Assignment::Value(param) => (p1, param),
            Assignment::Add(amount) if r.kind == DatabaseKind::Postgres => (
                format!("convert_to((convert_from({value}, 'UTF8')::bigint + {p1}::bigint)::text, 'UTF8')"),
                SqlValue::Integer(amount),
            ),
            Assignment::Add(amount) => (format!("{value} + {p1}"), SqlValue::Integer(amount)),
        };
        let mut sql = format!("UPDATE {} SET {value} = {rhs}", r.quote(&r.table));
        let mut params = vec![param];
        if let Some(key) = self.key {
            r.where_key(&mut sql, 2);
            params.push(SqlValue::Text(key));
        }
        Statement { sql, params }
    }
}

/// `DELETE` builder.
#[derive(Debug, Clone)]
pub struct Delete<'r> {
    relation: &'r Relation,
    key: Option<String>,
}

impl Delete<'_> {
    /// Restricts to one key; without it every row is deleted.
    #[must_use]
    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_owned());
        self
    }

    /// Renders the statement.
    pub fn build(self) -> Statement {
        let r = self.relation;
        let mut sql = format!("DELETE FROM {}", r.quote(&r.table));
        let mut params = Vec::new();
        if let Some(key) = self.key {
            r.where_key(&mut sql, 1);
            params.push(SqlValue::Text(key));
        }
        Statement { sql, params }
    }
}
