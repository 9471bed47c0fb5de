use rusqlite::params;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::ledger_db::open_ledger_connection;
use crate::money::cents_to_text;
use crate::period::PeriodBasis;
use crate::period_aggregator::{resolve_period_request, PeriodQueryRequest, ReportCategory};
use crate::record_mutations::{
    created_payload, empty_list, period_list_summary, storage_err, updated_payload,
};
use crate::session::Session;
use crate::validation::{
    now_timestamp, optional_amount, optional_date, optional_text, required_amount, required_date,
    required_id, required_text, PaymentMethod,
};

#[derive(Debug, Default, Deserialize)]
pub struct DebtRequest {
    pub id: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub due_date: Option<String>,
    pub payment_date: Option<String>,
    pub amount_paid: Option<String>,
    pub payment_method: Option<String>,
    pub installment: Option<String>,
}

struct DebtInput {
    description: String,
    amount_cents: i64,
    due_date: String,
    payment_date: Option<String>,
    amount_paid_cents: Option<i64>,
    payment_method: Option<PaymentMethod>,
    installment: Option<String>,
}

impl DebtInput {
    fn parse(req: &DebtRequest) -> LedgerResult<Self> {
        Ok(DebtInput {
            description: required_text(req.description.as_deref(), "description")?,
            amount_cents: required_amount(req.amount.as_deref(), "amount")?,
            due_date: required_date(req.due_date.as_deref(), "due_date")?,
            payment_date: optional_date(req.payment_date.as_deref(), "payment_date")?,
            amount_paid_cents: optional_amount(req.amount_paid.as_deref(), "amount_paid")?,
            payment_method: PaymentMethod::parse_optional(req.payment_method.as_deref())?,
            installment: optional_text(req.installment.as_deref()),
        })
    }

    fn to_row(&self, id: &str, now: &str) -> Value {
        debt_row_json(
            id,
            &self.description,
            self.amount_cents,
            self.amount_paid_cents,
            json!({
                "due_date": self.due_date,
                "payment_date": self.payment_date,
                "payment_method": self.payment_method.map(|m| m.as_str()),
                "installment": self.installment,
                "updated_at": now,
            }),
        )
    }
}

/// Outstanding never goes below zero when more than the amount was paid.
fn outstanding_cents(amount_cents: i64, amount_paid_cents: Option<i64>) -> i64 {
    amount_cents
        .saturating_sub(amount_paid_cents.unwrap_or(0))
        .max(0)
}

fn debt_row_json(
    id: &str,
    description: &str,
    amount_cents: i64,
    amount_paid_cents: Option<i64>,
    extra: Value,
) -> Value {
    let outstanding = outstanding_cents(amount_cents, amount_paid_cents);
    let mut row = json!({
        "id": id,
        "description": description,
        "amount_cents": amount_cents,
        "amount_text": cents_to_text(amount_cents),
        "amount_paid_cents": amount_paid_cents,
        "amount_paid_text": amount_paid_cents.map(cents_to_text),
        "outstanding_cents": outstanding,
        "outstanding_text": cents_to_text(outstanding),
    });
    if let (Some(obj), Value::Object(extra)) = (row.as_object_mut(), extra) {
        obj.extend(extra);
    }
    row
}

pub fn create_debt_at_db_path(
    db_path: &Path,
    session: &Session,
    req: DebtRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let input = DebtInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO debts(
            id, user_id, description, amount_cents, due_date, payment_date,
            amount_paid_cents, payment_method, installment, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
        "#,
        params![
            id,
            user_id,
            input.description,
            input.amount_cents,
            input.due_date,
            input.payment_date,
            input.amount_paid_cents,
            input.payment_method.map(|m| m.as_str()),
            input.installment,
            now
        ],
    )
    .map_err(storage_err("failed to insert debt"))?;

    Ok(created_payload("debt", &id, input.to_row(&id, &now)))
}

pub fn update_debt_at_db_path(
    db_path: &Path,
    session: &Session,
    req: DebtRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let input = DebtInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;

    let now = now_timestamp();
    let affected = conn
        .execute(
            r#"
            UPDATE debts
            SET description = ?1, amount_cents = ?2, due_date = ?3, payment_date = ?4,
                amount_paid_cents = ?5, payment_method = ?6, installment = ?7, updated_at = ?8
            WHERE id = ?9 AND user_id = ?10
            "#,
            params![
                input.description,
                input.amount_cents,
                input.due_date,
                input.payment_date,
                input.amount_paid_cents,
                input.payment_method.map(|m| m.as_str()),
                input.installment,
                now,
                id,
                user_id
            ],
        )
        .map_err(storage_err("failed to update debt"))?;

    Ok(updated_payload("debt", &id, affected, input.to_row(&id, &now)))
}

pub fn list_debts_at_db_path(
    db_path: &Path,
    session: &Session,
    req: PeriodQueryRequest,
    default_basis: PeriodBasis,
) -> LedgerResult<Value> {
    let Some(user_id) = session.user_id() else {
        return Ok(empty_list());
    };
    let (period, basis) = resolve_period_request(&req, default_basis)?;
    let conn = open_ledger_connection(db_path)?;

    let sql = format!(
        r#"
        SELECT
            id, description, amount_cents, amount_paid_cents, due_date, payment_date,
            payment_method, installment, created_at, updated_at
        FROM debts
        WHERE user_id = ?1 AND substr({}, 1, 7) = ?2
        ORDER BY due_date ASC, created_at ASC
        "#,
        ReportCategory::Debts.period_expr(basis, None)
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err("failed to query debts"))?;
    let iter = stmt
        .query_map(params![user_id, period.month_key()], |row| {
            let id = row.get::<_, String>(0)?;
            let description = row.get::<_, String>(1)?;
            let amount_cents = row.get::<_, i64>(2)?;
            let amount_paid_cents = row.get::<_, Option<i64>>(3)?;
            let extra = json!({
                "due_date": row.get::<_, String>(4)?,
                "payment_date": row.get::<_, Option<String>>(5)?,
                "payment_method": row.get::<_, Option<String>>(6)?,
                "installment": row.get::<_, Option<String>>(7)?,
                "created_at": row.get::<_, String>(8)?,
                "updated_at": row.get::<_, String>(9)?,
            });
            Ok((
                amount_cents,
                amount_paid_cents,
                debt_row_json(&id, &description, amount_cents, amount_paid_cents, extra),
            ))
        })
        .map_err(storage_err("failed to query debts"))?;

    let mut rows = Vec::new();
    let mut total = 0_i64;
    let mut paid_total = 0_i64;
    let mut outstanding_total = 0_i64;
    for item in iter {
        let (amount_cents, amount_paid_cents, row) =
            item.map_err(storage_err("failed to read debt"))?;
        total = total.saturating_add(amount_cents);
        paid_total = paid_total.saturating_add(amount_paid_cents.unwrap_or(0));
        outstanding_total =
            outstanding_total.saturating_add(outstanding_cents(amount_cents, amount_paid_cents));
        rows.push(row);
    }

    let mut summary = period_list_summary(period, basis, rows.len(), total);
    summary["amount_paid_cents"] = json!(paid_total);
    summary["amount_paid_text"] = json!(cents_to_text(paid_total));
    summary["outstanding_cents"] = json!(outstanding_total);
    summary["outstanding_text"] = json!(cents_to_text(outstanding_total));
    Ok(json!({
        "summary": summary,
        "rows": rows,
    }))
}
