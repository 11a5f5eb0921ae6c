//! Statement-level checks for dialects the test suite has no database for,
//! using the recording connection double.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use kvbridge_store::StoreError;
use kvbridge_store_sql::{
    DatabaseKind, Dialect, Generic, MySql, Postgres, SqlValue, Statements,
    testutil::{RecordingConnection, unique_violation},
};

fn blob(raw: &[u8]) -> SqlValue {
    SqlValue::Blob(raw.to_vec())
}

#[test]
fn mysql_store_is_single_upsert() {
    let sql = Statements::new(&MySql, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Mysql);
    MySql.store(&mut conn, &sql, b"k", b"v").unwrap();

    let recorded = conn.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].sql,
        "INSERT INTO `kv` (k, v) VALUES (?, ?) ON DUPLICATE KEY UPDATE v = VALUES(v)"
    );
    assert_eq!(recorded[0].params, vec![blob(b"k"), blob(b"v")]);
}

#[test]
fn mysql_increment_validates_under_lock_then_upserts() {
    let sql = Statements::new(&MySql, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Mysql)
        .then_scalar(Some(SqlValue::Integer(4)))
        .then_scalar(Some(SqlValue::Integer(7)));

    assert_eq!(MySql.increment(&mut conn, &sql, b"n", 3).unwrap(), 7);
    assert_eq!(
        conn.statements(),
        vec![
            "BEGIN",
            "SELECT v FROM `kv` WHERE k = ? FOR UPDATE",
            "INSERT INTO `kv` (k, v) VALUES (?, ?) ON DUPLICATE KEY UPDATE v = v + VALUES(v)",
            "SELECT v FROM `kv` WHERE k = ?",
            "COMMIT",
        ]
    );
}

#[test]
fn mysql_increment_of_text_rolls_back() {
    let sql = Statements::new(&MySql, "kv", 100);
    let mut conn =
        RecordingConnection::new(DatabaseKind::Mysql).then_scalar(Some(blob(b"not a number")));

    let err = MySql.increment(&mut conn, &sql, b"n", 1).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch { .. }), "got {err:?}");
    let statements = conn.statements();
    assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!statements.iter().any(|s| s.starts_with("INSERT")));
}

#[test]
fn mysql_uses_backtick_quoting_and_binary_columns() {
    assert_eq!(MySql.quote("odd`name"), "`odd``name`");
    assert_eq!(
        MySql.create_table_sql("kv"),
        "CREATE TABLE IF NOT EXISTS `kv` (k VARBINARY(255) NOT NULL PRIMARY KEY, v LONGBLOB)"
    );
}

#[test]
fn generic_increment_inserts_first() {
    let sql = Statements::new(&Generic, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Other);

    assert_eq!(Generic.increment(&mut conn, &sql, b"n", 5).unwrap(), 5);
    assert_eq!(conn.statements(), vec!["INSERT INTO \"kv\" (k, v) VALUES (?, ?)"]);
    assert_eq!(conn.recorded()[0].params, vec![blob(b"n"), SqlValue::Integer(5)]);
}

#[test]
fn generic_increment_zero_rows_is_conflict() {
    let sql = Statements::new(&Generic, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Other)
        .then_execute(Err(unique_violation()))
        .then_scalar(None)
        .then_execute(Ok(0));

    let err = Generic.increment(&mut conn, &sql, b"n", 5).unwrap_err();
    assert!(err.is_conflict(), "got {err:?}");
    assert_eq!(
        conn.statements(),
        vec![
            "INSERT INTO \"kv\" (k, v) VALUES (?, ?)",
            "BEGIN",
            "SELECT v FROM \"kv\" WHERE k = ? FOR UPDATE",
            "UPDATE \"kv\" SET v = v + ? WHERE k = ?",
            "ROLLBACK",
        ]
    );
}

#[test]
fn generic_store_insert_collision_is_conflict() {
    let sql = Statements::new(&Generic, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Other)
        .then_execute(Ok(0))
        .then_execute(Err(unique_violation()));

    let err = Generic.store(&mut conn, &sql, b"k", b"v").unwrap_err();
    assert!(err.is_conflict(), "got {err:?}");
}

#[test]
fn postgres_delete_uses_returning() {
    let sql = Statements::new(&Postgres, "kv", 100);
    let mut conn =
        RecordingConnection::new(DatabaseKind::Postgres).then_scalar(Some(blob(b"old")));

    assert_eq!(Postgres.delete(&mut conn, &sql, b"k").unwrap(), Some(blob(b"old")));
    assert_eq!(conn.statements(), vec!["DELETE FROM \"kv\" WHERE k = $1 RETURNING v"]);
}

#[test]
fn postgres_increment_adds_under_the_row_lock() {
    let sql = Statements::new(&Postgres, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Postgres).then_scalar(Some(blob(b"40")));

    assert_eq!(Postgres.increment(&mut conn, &sql, b"n", 2).unwrap(), 42);
    assert_eq!(
        conn.statements(),
        vec![
            "BEGIN",
            "SELECT v FROM \"kv\" WHERE k = $1 FOR UPDATE",
            "UPDATE \"kv\" SET v = $1 WHERE k = $2",
            "COMMIT",
        ]
    );
    assert_eq!(conn.recorded()[2].params, vec![blob(b"42"), blob(b"n")]);
    assert!(!conn.statements().iter().any(|s| s.contains(" + ")), "BYTEA has no arithmetic");
}

#[test]
fn postgres_increment_inserts_a_missing_row_as_text() {
    let sql = Statements::new(&Postgres, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Postgres);

    assert_eq!(Postgres.increment(&mut conn, &sql, b"n", -3).unwrap(), -3);
    let recorded = conn.recorded();
    assert_eq!(recorded[2].sql, "INSERT INTO \"kv\" (k, v) VALUES ($1, $2)");
    assert_eq!(recorded[2].params, vec![blob(b"n"), blob(b"-3")]);
}

#[test]
fn postgres_increment_insert_race_is_conflict() {
    let sql = Statements::new(&Postgres, "kv", 100);
    let mut conn = RecordingConnection::new(DatabaseKind::Postgres).then_execute(Err(unique_violation()));

    let err = Postgres.increment(&mut conn, &sql, b"n", 1).unwrap_err();
    assert!(err.is_conflict(), "got {err:?}");
    assert_eq!(conn.statements().last().map(String::as_str), Some("ROLLBACK"));
}
