use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::{LedgerError, LedgerResult};

/// Owned tables, children first so counts read top-down like the schema.
pub(crate) const LEDGER_DATA_TABLES: &[&str] = &[
    "incomes",
    "fixed_expenses",
    "variable_expenses",
    "debts",
    "investments",
    "goals",
    "categories",
    "bank_accounts",
    "users",
];

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init.sql",
        include_str!("../db/migrations/0001_init.sql"),
    ),
    (
        "0002_period_indexes.sql",
        include_str!("../db/migrations/0002_period_indexes.sql"),
    ),
];

#[derive(Debug, Serialize)]
pub struct LedgerDbStatus {
    pub db_path: String,
    pub exists: bool,
    pub migration_files: Vec<String>,
    pub applied_versions: Vec<String>,
    pub pending_versions: Vec<String>,
    pub schema_migrations_table_exists: bool,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
    pub pending_total: usize,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbStatsSummary {
    pub table_count: usize,
    pub total_rows: i64,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbTableCountRow {
    pub table: String,
    pub row_count: i64,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbStatsResult {
    pub db_path: String,
    pub summary: LedgerDbStatsSummary,
    pub rows: Vec<LedgerDbTableCountRow>,
}

/// Per-request connection with the pragmas every operation relies on.
pub fn open_ledger_connection(db_path: &Path) -> LedgerResult<Connection> {
    let conn = Connection::open(db_path)
        .map_err(|e| LedgerError::storage(format!("failed to open database: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        .map_err(|e| LedgerError::storage(format!("failed to set connection pragmas: {e}")))?;
    Ok(conn)
}

fn storage(context: &str) -> impl Fn(rusqlite::Error) -> LedgerError + '_ {
    move |e| LedgerError::storage(format!("{context}: {e}"))
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn has_schema_migrations_table(conn: &Connection) -> rusqlite::Result<bool> {
    table_exists(conn, "schema_migrations")
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|v| v != 0)
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn inspect_status_at_db_path(db_path: &Path) -> LedgerResult<LedgerDbStatus> {
    let migration_files = MIGRATIONS
        .iter()
        .map(|(v, _)| (*v).to_string())
        .collect::<Vec<_>>();
    if !db_path.exists() {
        return Ok(LedgerDbStatus {
            db_path: db_path.to_string_lossy().to_string(),
            exists: false,
            migration_files: migration_files.clone(),
            applied_versions: Vec::new(),
            pending_versions: migration_files,
            schema_migrations_table_exists: false,
            ready: false,
        });
    }

    let conn = open_ledger_connection(db_path)?;
    let schema_table_exists =
        has_schema_migrations_table(&conn).map_err(storage("failed to check schema_migrations"))?;
    let applied_versions = if schema_table_exists {
        load_applied_versions(&conn).map_err(storage("failed to read schema_migrations"))?
    } else {
        Vec::new()
    };
    let applied_set = applied_versions.iter().cloned().collect::<HashSet<_>>();
    let pending_versions = migration_files
        .iter()
        .filter(|v| !applied_set.contains(*v))
        .cloned()
        .collect::<Vec<_>>();

    Ok(LedgerDbStatus {
        db_path: db_path.to_string_lossy().to_string(),
        exists: true,
        migration_files,
        applied_versions,
        ready: pending_versions.is_empty(),
        pending_versions,
        schema_migrations_table_exists: schema_table_exists,
    })
}

/// Applies every embedded migration not yet recorded, one transaction each.
pub fn apply_embedded_migrations(db_path: &Path) -> LedgerResult<LedgerDbMigrateResult> {
    let created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LedgerError::storage(format!("failed to create database directory: {e}"))
            })?;
        }
    }

    let mut conn = open_ledger_connection(db_path)?;
    // WAL persists in the file, so setting it once here covers later connections.
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
        .map_err(storage("failed to enable WAL"))?;
    ensure_schema_migrations_table(&conn).map_err(storage("failed to create schema_migrations"))?;

    let already = load_applied_versions(&conn)
        .map_err(storage("failed to read applied migrations"))?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();
    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn
            .transaction()
            .map_err(|e| LedgerError::storage(format!("failed to begin migration {version}: {e}")))?;
        tx.execute_batch(sql)
            .map_err(|e| LedgerError::storage(format!("migration {version} failed: {e}")))?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )
        .map_err(|e| LedgerError::storage(format!("failed to record migration {version}: {e}")))?;
        tx.commit()
            .map_err(|e| LedgerError::storage(format!("failed to commit migration {version}: {e}")))?;
        info!(version = *version, "applied migration");
        applied_now.push((*version).to_string());
    }

    let applied_total = load_applied_versions(&conn)
        .map_err(storage("failed to read migration result"))?
        .len();

    Ok(LedgerDbMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total,
        pending_total: MIGRATIONS.len().saturating_sub(applied_total),
    })
}

pub(crate) fn count_table_rows(conn: &Connection, table: &str) -> LedgerResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
        .map_err(|e| LedgerError::storage(format!("failed to count {table}: {e}")))
}

pub fn query_db_stats_at_db_path(db_path: &Path) -> LedgerResult<LedgerDbStatsResult> {
    if !db_path.exists() {
        return Err(LedgerError::storage(format!(
            "database does not exist: {}",
            db_path.to_string_lossy()
        )));
    }
    let conn = open_ledger_connection(db_path)?;

    let mut rows = Vec::new();
    let mut total_rows = 0_i64;
    for table in LEDGER_DATA_TABLES {
        if !table_exists(&conn, table).map_err(storage("failed to read sqlite_master"))? {
            continue;
        }
        let row_count = count_table_rows(&conn, table)?;
        total_rows += row_count;
        rows.push(LedgerDbTableCountRow {
            table: (*table).to_string(),
            row_count,
        });
    }

    Ok(LedgerDbStatsResult {
        db_path: db_path.to_string_lossy().to_string(),
        summary: LedgerDbStatsSummary {
            table_count: rows.len(),
            total_rows,
        },
        rows,
    })
}
