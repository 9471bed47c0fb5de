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
pub struct IncomeRequest {
    pub id: Option<String>,
    pub description: Option<String>,
    pub income_date: Option<String>,
    pub amount: Option<String>,
    pub bank_account_id: Option<String>,
}

struct IncomeInput {
    description: String,
    income_date: String,
    amount_cents: i64,
    bank_account_id: String,
}

fn parse_income(req: &IncomeRequest) -> LedgerResult<IncomeInput> {
    Ok(IncomeInput {
        description: required_text(req.description.as_deref(), "description")?,
        income_date: required_date(req.income_date.as_deref(), "income_date")?,
        amount_cents: required_amount(req.amount.as_deref(), "amount")?,
        bank_account_id: required_text(req.bank_account_id.as_deref(), "bank_account_id")?,
    })
}

fn income_row(id: &str, input: &IncomeInput, now: &str) -> Value {
    json!({
        "id": id,
        "description": input.description,
        "income_date": input.income_date,
        "amount_cents": input.amount_cents,
        "amount_text": cents_to_text(input.amount_cents),
        "bank_account_id": input.bank_account_id,
        "updated_at": now,
    })
}

pub fn create_income_at_db_path(
    db_path: &Path,
    session: &Session,
    req: IncomeRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let input = parse_income(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::BankAccount, &input.bank_account_id, user_id)?;

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO incomes(id, user_id, description, income_date, amount_cents, bank_account_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
        params![
            id,
            user_id,
            input.description,
            input.income_date,
            input.amount_cents,
            input.bank_account_id,
            now
        ],
    )
    .map_err(storage_err("failed to insert income"))?;

    Ok(created_payload("income", &id, income_row(&id, &input, &now)))
}

pub fn update_income_at_db_path(
    db_path: &Path,
    session: &Session,
    req: IncomeRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let input = parse_income(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::BankAccount, &input.bank_account_id, user_id)?;

    let now = now_timestamp();
    let affected = conn
        .execute(
            r#"
            UPDATE incomes
            SET description = ?1, income_date = ?2, amount_cents = ?3, bank_account_id = ?4, updated_at = ?5
            WHERE id = ?6 AND user_id = ?7
            "#,
            params![
                input.description,
                input.income_date,
                input.amount_cents,
                input.bank_account_id,
                now,
                id,
                user_id
            ],
        )
        .map_err(storage_err("failed to update income"))?;

    Ok(updated_payload("income", &id, affected, income_row(&id, &input, &now)))
}

/// Period-filtered incomes with the receiving bank's name.
pub fn list_incomes_at_db_path(
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
        SELECT i.id, i.description, i.income_date, i.amount_cents, i.bank_account_id, b.bank_name,
               i.created_at, i.updated_at
        FROM incomes i
        LEFT JOIN bank_accounts b ON b.id = i.bank_account_id
        WHERE i.user_id = ?1 AND substr({}, 1, 7) = ?2
        ORDER BY i.income_date DESC, i.created_at DESC
        "#,
        ReportCategory::Income.period_expr(basis, Some("i"))
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err("failed to query incomes"))?;
    let iter = stmt
        .query_map(params![user_id, period.month_key()], |row| {
            let amount_cents = row.get::<_, i64>(3)?;
            Ok((
                amount_cents,
                json!({
                    "id": row.get::<_, String>(0)?,
                    "description": row.get::<_, String>(1)?,
                    "income_date": row.get::<_, String>(2)?,
                    "amount_cents": amount_cents,
                    "amount_text": cents_to_text(amount_cents),
                    "bank_account_id": row.get::<_, String>(4)?,
                    "bank_name": row.get::<_, Option<String>>(5)?,
                    "created_at": row.get::<_, String>(6)?,
                    "updated_at": row.get::<_, String>(7)?,
                }),
            ))
        })
        .map_err(storage_err("failed to query incomes"))?;

    let mut rows = Vec::new();
    let mut total = 0_i64;
    for item in iter {
        let (amount_cents, row) = item.map_err(storage_err("failed to read income"))?;
        total = total.saturating_add(amount_cents);
        rows.push(row);
    }

    Ok(json!({
        "summary": period_list_summary(period, basis, rows.len(), total),
        "rows": rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank_accounts::{create_bank_account_at_db_path, BankAccountRequest};
    use crate::error::LedgerError;
    use crate::test_support::{backdate, created_id, migrated_temp_db, seed_user, v_i64, v_str};

    fn seed_account(db_path: &Path, session: &Session) -> String {
        let created = create_bank_account_at_db_path(
            db_path,
            session,
            BankAccountRequest {
                bank_name: Some("Nubank".to_string()),
                branch: Some("0001".to_string()),
                account_number: Some("42".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        created_id(&created)
    }

    fn salary(bank_account_id: &str, amount: &str) -> IncomeRequest {
        IncomeRequest {
            description: Some("Salary".to_string()),
            income_date: Some("2024-03-05".to_string()),
            amount: Some(amount.to_string()),
            bank_account_id: Some(bank_account_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn list_joins_bank_name_and_sums_the_period() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        let account = seed_account(&db_path, &session);

        for (amount, stamp) in [
            ("1000.00", "2024-03-05 10:00:00"),
            ("500.50", "2024-03-20 10:00:00"),
            ("75", "2024-04-01 10:00:00"),
        ] {
            let created = create_income_at_db_path(&db_path, &session, salary(&account, amount)).unwrap();
            backdate(&db_path, "incomes", &created_id(&created), stamp);
        }

        let listed = list_incomes_at_db_path(
            &db_path,
            &session,
            PeriodQueryRequest {
                month: Some("3".to_string()),
                year: Some("2024".to_string()),
                period_basis: None,
            },
            PeriodBasis::CreatedAt,
        )
        .unwrap();
        assert_eq!(v_i64(&listed, &["summary", "count"]), 2);
        assert_eq!(v_str(&listed, &["summary", "total_text"]), "1500.50");
        assert_eq!(v_str(&listed, &["rows", "0", "bank_name"]), "Nubank");
    }

    #[test]
    fn bank_account_must_belong_to_the_caller() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        seed_user(&db_path, "user_b");
        let account = seed_account(&db_path, &Session::authenticated("user_a"));

        let err = create_income_at_db_path(
            &db_path,
            &Session::authenticated("user_b"),
            salary(&account, "10"),
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("bank_account_id"));

        let err = create_income_at_db_path(&db_path, &Session::Anonymous, salary(&account, "10"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthenticated));
    }

    #[test]
    fn update_changes_amount_in_place() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        let account = seed_account(&db_path, &session);
        let created = create_income_at_db_path(&db_path, &session, salary(&account, "10")).unwrap();

        let mut update = salary(&account, "20.5");
        update.id = Some(created_id(&created));
        let updated = update_income_at_db_path(&db_path, &session, update).unwrap();
        assert_eq!(v_i64(&updated, &["affected_rows"]), 1);
        assert_eq!(v_i64(&updated, &["row", "amount_cents"]), 2_050);

        let mut missing = salary(&account, "1");
        missing.id = Some("does-not-exist".to_string());
        let result = update_income_at_db_path(&db_path, &session, missing).unwrap();
        assert_eq!(v_i64(&result, &["affected_rows"]), 0);
    }

    #[test]
    fn short_dates_are_stored_canonically_and_counted_by_record_date() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        let account = seed_account(&db_path, &session);

        let mut req = salary(&account, "250");
        req.income_date = Some("2024-3-5".to_string());
        let created = create_income_at_db_path(&db_path, &session, req).unwrap();
        assert_eq!(v_str(&created, &["row", "income_date"]), "2024-03-05");

        let report = crate::period_aggregator::query_general_report_at_db_path(
            &db_path,
            &session,
            PeriodQueryRequest {
                month: Some("3".to_string()),
                year: Some("2024".to_string()),
                period_basis: Some("record_date".to_string()),
            },
            PeriodBasis::CreatedAt,
        )
        .unwrap();
        assert_eq!(v_i64(&report, &["categories", "income", "count"]), 1);
        assert_eq!(v_i64(&report, &["categories", "income", "total_cents"]), 25_000);
    }
}
