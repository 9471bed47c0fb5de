use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::ledger_db::{apply_embedded_migrations, open_ledger_connection};

pub(crate) fn migrated_temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("fincontrol_test.db");
    apply_embedded_migrations(&db_path).expect("apply migrations");
    (dir, db_path)
}

pub(crate) fn seed_user(db_path: &Path, user_id: &str) {
    let conn = open_ledger_connection(db_path).expect("open db");
    conn.execute(
        "INSERT INTO users(id, name, email, is_active, created_at, updated_at)
         VALUES (?1, ?1, ?1 || '@example.com', 1, '2024-01-01 00:00:00', '2024-01-01 00:00:00')",
        [user_id],
    )
    .expect("seed user");
}

/// Moves a row into another reporting period.
pub(crate) fn backdate(db_path: &Path, table: &str, id: &str, stamp: &str) {
    let conn = open_ledger_connection(db_path).expect("open db");
    let sql = format!("UPDATE {table} SET created_at = ?1 WHERE id = ?2");
    let changed = conn.execute(&sql, [stamp, id]).expect("backdate row");
    assert_eq!(changed, 1, "backdate {table}/{id}");
}

pub(crate) fn count_rows(db_path: &Path, table: &str) -> i64 {
    let conn = open_ledger_connection(db_path).expect("open db");
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

fn get_path<'a>(v: &'a Value, path: &[&str]) -> &'a Value {
    let mut current = v;
    for part in path {
        let next = match (current.as_array(), part.parse::<usize>()) {
            (Some(items), Ok(index)) => items.get(index),
            _ => current.get(*part),
        };
        current = next.unwrap_or_else(|| panic!("missing key {part} in path {path:?}"));
    }
    current
}

pub(crate) fn v_i64(v: &Value, path: &[&str]) -> i64 {
    get_path(v, path)
        .as_i64()
        .unwrap_or_else(|| panic!("{path:?} is not an integer"))
}

pub(crate) fn v_str<'a>(v: &'a Value, path: &[&str]) -> &'a str {
    get_path(v, path)
        .as_str()
        .unwrap_or_else(|| panic!("{path:?} is not a string"))
}

pub(crate) fn created_id(v: &Value) -> String {
    v_str(v, &["id"]).to_string()
}
