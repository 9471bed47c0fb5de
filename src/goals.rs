use rusqlite::params;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::ledger_db::open_ledger_connection;
use crate::money::{cents_to_text, round_to};
use crate::record_mutations::{
    created_payload, deleted_payload, empty_list, storage_err, updated_payload,
    RecordDeleteRequest,
};
use crate::session::Session;
use crate::validation::{
    ensure_owned_reference, now_timestamp, optional_amount, required_amount, required_date,
    required_id, required_text, OwnedReference,
};

#[derive(Debug, Default, Deserialize)]
pub struct GoalRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub target_amount: Option<String>,
    pub current_amount: Option<String>,
    pub target_date: Option<String>,
    pub bank_account_id: Option<String>,
}

struct GoalInput {
    name: String,
    target_amount_cents: i64,
    current_amount_cents: i64,
    target_date: String,
    bank_account_id: String,
}

impl GoalInput {
    fn parse(req: &GoalRequest) -> LedgerResult<Self> {
        Ok(GoalInput {
            name: required_text(req.name.as_deref(), "name")?,
            target_amount_cents: required_amount(req.target_amount.as_deref(), "target_amount")?,
            current_amount_cents: optional_amount(req.current_amount.as_deref(), "current_amount")?
                .unwrap_or(0),
            target_date: required_date(req.target_date.as_deref(), "target_date")?,
            bank_account_id: required_text(req.bank_account_id.as_deref(), "bank_account_id")?,
        })
    }
}

/// `None` when the target is zero.
fn progress_rate(current_cents: i64, target_cents: i64) -> Option<f64> {
    if target_cents <= 0 {
        return None;
    }
    Some(round_to(current_cents as f64 / target_cents as f64, 4))
}

fn goal_row(id: &str, name: &str, target: i64, current: i64, extra: Value) -> Value {
    let rate = progress_rate(current, target);
    let remaining = target.saturating_sub(current).max(0);
    let mut row = json!({
        "id": id,
        "name": name,
        "target_amount_cents": target,
        "target_amount_text": cents_to_text(target),
        "current_amount_cents": current,
        "current_amount_text": cents_to_text(current),
        "remaining_cents": remaining,
        "remaining_text": cents_to_text(remaining),
        "progress_rate": rate,
        "progress_pct_text": rate.map(|v| format!("{:.2}%", v * 100.0)).unwrap_or_else(|| "-".to_string()),
        "reached": current >= target,
    });
    if let (Some(obj), Value::Object(extra)) = (row.as_object_mut(), extra) {
        obj.extend(extra);
    }
    row
}

pub fn create_goal_at_db_path(
    db_path: &Path,
    session: &Session,
    req: GoalRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let input = GoalInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::BankAccount, &input.bank_account_id, user_id)?;

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO goals(
            id, user_id, name, target_amount_cents, current_amount_cents, target_date,
            bank_account_id, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
        params![
            id,
            user_id,
            input.name,
            input.target_amount_cents,
            input.current_amount_cents,
            input.target_date,
            input.bank_account_id,
            now
        ],
    )
    .map_err(storage_err("failed to insert goal"))?;

    let row = goal_row(
        &id,
        &input.name,
        input.target_amount_cents,
        input.current_amount_cents,
        json!({
            "target_date": input.target_date,
            "bank_account_id": input.bank_account_id,
            "updated_at": now,
        }),
    );
    Ok(created_payload("goal", &id, row))
}

pub fn update_goal_at_db_path(
    db_path: &Path,
    session: &Session,
    req: GoalRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let input = GoalInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::BankAccount, &input.bank_account_id, user_id)?;

    let now = now_timestamp();
    let affected = conn
        .execute(
            r#"
            UPDATE goals
            SET name = ?1, target_amount_cents = ?2, current_amount_cents = ?3, target_date = ?4,
                bank_account_id = ?5, updated_at = ?6
            WHERE id = ?7 AND user_id = ?8
            "#,
            params![
                input.name,
                input.target_amount_cents,
                input.current_amount_cents,
                input.target_date,
                input.bank_account_id,
                now,
                id,
                user_id
            ],
        )
        .map_err(storage_err("failed to update goal"))?;

    let row = goal_row(
        &id,
        &input.name,
        input.target_amount_cents,
        input.current_amount_cents,
        json!({
            "target_date": input.target_date,
            "bank_account_id": input.bank_account_id,
            "updated_at": now,
        }),
    );
    Ok(updated_payload("goal", &id, affected, row))
}

pub fn delete_goal_at_db_path(
    db_path: &Path,
    session: &Session,
    req: RecordDeleteRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let conn = open_ledger_connection(db_path)?;
    let affected = conn
        .execute(
            "DELETE FROM goals WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )
        .map_err(storage_err("failed to delete goal"))?;
    Ok(deleted_payload("goal", &id, affected, json!({})))
}

pub fn list_goals_at_db_path(db_path: &Path, session: &Session) -> LedgerResult<Value> {
    let Some(user_id) = session.user_id() else {
        return Ok(empty_list());
    };
    let conn = open_ledger_connection(db_path)?;
    let mut stmt = conn
        .prepare(
            r#"
            SELECT g.id, g.name, g.target_amount_cents, g.current_amount_cents, g.target_date,
                   g.bank_account_id, b.bank_name, g.created_at, g.updated_at
            FROM goals g
            LEFT JOIN bank_accounts b ON b.id = g.bank_account_id
            WHERE g.user_id = ?1
            ORDER BY g.target_date ASC, g.name ASC
            "#,
        )
        .map_err(storage_err("failed to query goals"))?;
    let iter = stmt
        .query_map([user_id], |row| {
            let id = row.get::<_, String>(0)?;
            let name = row.get::<_, String>(1)?;
            let target = row.get::<_, i64>(2)?;
            let current = row.get::<_, i64>(3)?;
            let extra = json!({
                "target_date": row.get::<_, String>(4)?,
                "bank_account_id": row.get::<_, String>(5)?,
                "bank_name": row.get::<_, Option<String>>(6)?,
                "created_at": row.get::<_, String>(7)?,
                "updated_at": row.get::<_, String>(8)?,
            });
            Ok((target, current, goal_row(&id, &name, target, current, extra)))
        })
        .map_err(storage_err("failed to query goals"))?;

    let mut rows = Vec::new();
    let mut target_total = 0_i64;
    let mut current_total = 0_i64;
    let mut reached = 0_usize;
    for item in iter {
        let (target, current, row) = item.map_err(storage_err("failed to read goal"))?;
        target_total = target_total.saturating_add(target);
        current_total = current_total.saturating_add(current);
        if current >= target {
            reached += 1;
        }
        rows.push(row);
    }

    Ok(json!({
        "summary": {
            "count": rows.len(),
            "reached_count": reached,
            "target_total_cents": target_total,
            "target_total_text": cents_to_text(target_total),
            "current_total_cents": current_total,
            "current_total_text": cents_to_text(current_total),
            "progress_rate": progress_rate(current_total, target_total),
        },
        "rows": rows,
    }))
}
