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
    ensure_owned_reference, now_timestamp, required_amount, required_date, required_id,
    required_text, OwnedReference,
};

#[derive(Debug, Default, Deserialize)]
pub struct InvestmentRequest {
    pub id: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub investment_date: Option<String>,
    pub bank_account_id: Option<String>,
}

struct InvestmentInput {
    description: String,
    amount_cents: i64,
    investment_date: String,
    bank_account_id: String,
}

impl InvestmentInput {
    fn parse(req: &InvestmentRequest) -> LedgerResult<Self> {
        Ok(InvestmentInput {
            description: required_text(req.description.as_deref(), "description")?,
            amount_cents: required_amount(req.amount.as_deref(), "amount")?,
            investment_date: required_date(req.investment_date.as_deref(), "investment_date")?,
            bank_account_id: required_text(req.bank_account_id.as_deref(), "bank_account_id")?,
        })
    }

    fn to_row(&self, id: &str, now: &str) -> Value {
        json!({
            "id": id,
            "description": self.description,
            "amount_cents": self.amount_cents,
            "amount_text": cents_to_text(self.amount_cents),
            "investment_date": self.investment_date,
            "bank_account_id": self.bank_account_id,
            "updated_at": now,
        })
    }
}

pub fn create_investment_at_db_path(
    db_path: &Path,
    session: &Session,
    req: InvestmentRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let input = InvestmentInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::BankAccount, &input.bank_account_id, user_id)?;

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO investments(id, user_id, description, amount_cents, investment_date, bank_account_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
        params![
            id,
            user_id,
            input.description,
            input.amount_cents,
            input.investment_date,
            input.bank_account_id,
            now
        ],
    )
    .map_err(storage_err("failed to insert investment"))?;

    Ok(created_payload("investment", &id, input.to_row(&id, &now)))
}

pub fn update_investment_at_db_path(
    db_path: &Path,
    session: &Session,
    req: InvestmentRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let input = InvestmentInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::BankAccount, &input.bank_account_id, user_id)?;

    let now = now_timestamp();
    let affected = conn
        .execute(
            r#"
            UPDATE investments
            SET description = ?1, amount_cents = ?2, investment_date = ?3, bank_account_id = ?4, updated_at = ?5
            WHERE id = ?6 AND user_id = ?7
            "#,
            params![
                input.description,
                input.amount_cents,
                input.investment_date,
                input.bank_account_id,
                now,
                id,
                user_id
            ],
        )
        .map_err(storage_err("failed to update investment"))?;

    Ok(updated_payload("investment", &id, affected, input.to_row(&id, &now)))
}

pub fn list_investments_at_db_path(
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
        SELECT v.id, v.description, v.amount_cents, v.investment_date, v.bank_account_id, b.bank_name,
               v.created_at, v.updated_at
        FROM investments v
        LEFT JOIN bank_accounts b ON b.id = v.bank_account_id
        WHERE v.user_id = ?1 AND substr({}, 1, 7) = ?2
        ORDER BY v.investment_date DESC, v.created_at DESC
        "#,
        ReportCategory::Investments.period_expr(basis, Some("v"))
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err("failed to query investments"))?;
    let iter = stmt
        .query_map(params![user_id, period.month_key()], |row| {
            let amount_cents = row.get::<_, i64>(2)?;
            Ok((
                amount_cents,
                json!({
                    "id": row.get::<_, String>(0)?,
                    "description": row.get::<_, String>(1)?,
                    "amount_cents": amount_cents,
                    "amount_text": cents_to_text(amount_cents),
                    "investment_date": row.get::<_, String>(3)?,
                    "bank_account_id": row.get::<_, String>(4)?,
                    "bank_name": row.get::<_, Option<String>>(5)?,
                    "created_at": row.get::<_, String>(6)?,
                    "updated_at": row.get::<_, String>(7)?,
                }),
            ))
        })
        .map_err(storage_err("failed to query investments"))?;

    let mut rows = Vec::new();
    let mut total = 0_i64;
    for item in iter {
        let (amount_cents, row) = item.map_err(storage_err("failed to read investment"))?;
        total = total.saturating_add(amount_cents);
        rows.push(row);
    }

    Ok(json!({
        "summary": period_list_summary(period, basis, rows.len(), total),
        "rows": rows,
    }))
}
