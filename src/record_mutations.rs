use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::money::cents_to_text;
use crate::period::{Period, PeriodBasis};

#[derive(Debug, Default, Deserialize)]
pub struct RecordDeleteRequest {
    pub id: Option<String>,
}

pub(crate) fn storage_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> LedgerError {
    move |e| LedgerError::storage(format!("{context}: {e}"))
}

pub(crate) fn created_payload(entity: &str, id: &str, row: Value) -> Value {
    info!(entity, id, "created record");
    json!({
        "created": true,
        "id": id,
        "affected_rows": 1,
        "row": row,
    })
}

/// A missing or foreign row is reported as zero affected rows.
pub(crate) fn updated_payload(entity: &str, id: &str, affected: usize, row: Value) -> Value {
    info!(entity, id, affected, "updated record");
    json!({
        "updated": affected > 0,
        "id": id,
        "affected_rows": affected,
        "row": if affected > 0 { row } else { Value::Null },
    })
}

pub(crate) fn deleted_payload(entity: &str, id: &str, affected: usize, cascaded: Value) -> Value {
    info!(entity, id, affected, "deleted record");
    json!({
        "deleted": affected > 0,
        "id": id,
        "affected_rows": affected,
        "cascaded": cascaded,
    })
}

pub(crate) fn empty_list() -> Value {
    json!({
        "summary": { "count": 0 },
        "rows": [],
    })
}

/// Summary block shared by the period-filtered lists.
pub(crate) fn period_list_summary(
    period: Period,
    basis: PeriodBasis,
    count: usize,
    total_cents: i64,
) -> Value {
    json!({
        "count": count,
        "month": period.month,
        "year": period.year,
        "period_basis": basis.as_str(),
        "total_cents": total_cents,
        "total_text": cents_to_text(total_cents),
    })
}

pub(crate) fn count_where(conn: &Connection, sql: &str, id: &str) -> LedgerResult<i64> {
    conn.query_row(sql, [id], |row| row.get::<_, i64>(0))
        .map_err(|e| LedgerError::storage(format!("failed to count references: {e}")))
}
