use carstore_core::db::migrations::latest_version;
use carstore_core::db::{open_store, DbError};
use carstore_core::ContextOptions;
use rusqlite::Connection;

#[test]
fn open_store_in_memory_applies_all_migrations() {
    let conn = open_store(&ContextOptions::memory("migrations-fresh")).unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "cars");
}

#[test]
fn opening_same_file_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let options = ContextOptions::file(dir.path().join("cars.db"));

    let conn_first = open_store(&options).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_store(&options).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "cars");
}

#[test]
fn opening_store_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_store(&ContextOptions::file(&path)).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn read_only_store_is_not_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unmigrated.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE placeholder (value TEXT);")
        .unwrap();

    let err = open_store(&ContextOptions::file(&path).read_only(true)).unwrap_err();
    assert!(matches!(
        err,
        DbError::ReadOnlyOutdated { db_version: 0, .. }
    ));

    open_store(&ContextOptions::file(&path)).unwrap();
    let conn = open_store(&ContextOptions::file(&path).read_only(true)).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
}

#[test]
fn read_only_store_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let options = ContextOptions::file(dir.path().join("missing.db")).read_only(true);

    assert!(matches!(open_store(&options), Err(DbError::Sqlite(_))));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
