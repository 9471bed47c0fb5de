use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::ledger_db::{
    count_table_rows, inspect_status_at_db_path, open_ledger_connection, query_db_stats_at_db_path,
    LEDGER_DATA_TABLES,
};

fn checked_at() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn health_payload(failures: Vec<String>, warnings: Vec<String>, checks: Map<String, Value>) -> Value {
    json!({
        "ok": failures.is_empty(),
        "checked_at": checked_at(),
        "failures": failures,
        "warnings": warnings,
        "checks": Value::Object(checks),
    })
}

/// Readiness probe: schema state, table counts and one read per ledger table.
/// Problems are reported in the payload, never as an error.
pub fn runtime_db_health_check_at_db_path(db_path: &Path) -> Value {
    let mut failures: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut checks = Map::<String, Value>::new();
    checks.insert(
        "db_path".to_string(),
        Value::String(db_path.to_string_lossy().to_string()),
    );

    match inspect_status_at_db_path(db_path) {
        Ok(status) => {
            if !status.ready {
                failures.push(format!(
                    "schema is not ready: pending {}",
                    status.pending_versions.join(", ")
                ));
            }
            checks.insert(
                "schema".to_string(),
                json!({
                    "ready": status.ready,
                    "applied": status.applied_versions,
                    "pending": status.pending_versions,
                }),
            );
        }
        Err(e) => {
            failures.push(format!("schema check failed: {e}"));
            return health_payload(failures, warnings, checks);
        }
    }

    let total_rows = match query_db_stats_at_db_path(db_path) {
        Ok(stats) => {
            checks.insert(
                "db_stats".to_string(),
                json!({
                    "table_count": stats.summary.table_count,
                    "total_rows": stats.summary.total_rows,
                }),
            );
            stats.summary.total_rows
        }
        Err(e) => {
            failures.push(format!("db_stats failed: {e}"));
            return health_payload(failures, warnings, checks);
        }
    };

    let conn = match open_ledger_connection(db_path) {
        Ok(c) => c,
        Err(e) => {
            failures.push(format!("open_db failed: {e}"));
            return health_payload(failures, warnings, checks);
        }
    };
    let mut probes = Map::new();
    for table in LEDGER_DATA_TABLES {
        match count_table_rows(&conn, table) {
            Ok(rows) => {
                probes.insert((*table).to_string(), json!({ "ok": true, "rows": rows }));
            }
            Err(e) => failures.push(format!("probe {table} failed: {e}")),
        }
    }
    checks.insert("tables".to_string(), Value::Object(probes));

    if total_rows == 0 {
        warnings.push("database has no ledger rows yet (total_rows = 0)".to_string());
    }

    health_payload(failures, warnings, checks)
}
