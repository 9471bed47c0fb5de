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
    ensure_owned_reference, now_timestamp, optional_date, optional_text, required_amount,
    required_id, required_text, ExpenseStatus, OwnedReference, PaymentMethod,
};

/// Fixed and variable expenses share one shape and one table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpenseKind {
    Fixed,
    Variable,
}

impl ExpenseKind {
    fn table(&self) -> &'static str {
        self.report_category().table()
    }

    fn entity(&self) -> &'static str {
        match self {
            ExpenseKind::Fixed => "fixed_expense",
            ExpenseKind::Variable => "variable_expense",
        }
    }

    fn report_category(&self) -> ReportCategory {
        match self {
            ExpenseKind::Fixed => ReportCategory::FixedExpenses,
            ExpenseKind::Variable => ReportCategory::VariableExpenses,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseRequest {
    pub id: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub amount: Option<String>,
    pub status: Option<String>,
    pub payment_method: Option<String>,
    pub payment_date: Option<String>,
    pub installment: Option<String>,
}

struct ExpenseInput {
    description: String,
    category_id: String,
    amount_cents: i64,
    status: ExpenseStatus,
    payment_method: Option<PaymentMethod>,
    payment_date: Option<String>,
    installment: Option<String>,
}

impl ExpenseInput {
    fn parse(req: &ExpenseRequest) -> LedgerResult<Self> {
        Ok(ExpenseInput {
            description: required_text(req.description.as_deref(), "description")?,
            category_id: required_text(req.category_id.as_deref(), "category_id")?,
            amount_cents: required_amount(req.amount.as_deref(), "amount")?,
            status: ExpenseStatus::parse(req.status.as_deref())?,
            payment_method: PaymentMethod::parse_optional(req.payment_method.as_deref())?,
            payment_date: optional_date(req.payment_date.as_deref(), "payment_date")?,
            installment: optional_text(req.installment.as_deref()),
        })
    }

    fn to_row(&self, id: &str, now: &str) -> Value {
        json!({
            "id": id,
            "description": self.description,
            "category_id": self.category_id,
            "amount_cents": self.amount_cents,
            "amount_text": cents_to_text(self.amount_cents),
            "status": self.status.as_str(),
            "payment_method": self.payment_method.map(|m| m.as_str()),
            "payment_date": self.payment_date,
            "installment": self.installment,
            "updated_at": now,
        })
    }
}

pub fn create_expense_at_db_path(
    db_path: &Path,
    session: &Session,
    kind: ExpenseKind,
    req: ExpenseRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let input = ExpenseInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::Category, &input.category_id, user_id)?;

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    let sql = format!(
        r#"
        INSERT INTO {}(
            id, user_id, description, category_id, amount_cents, status,
            payment_method, payment_date, installment, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
        "#,
        kind.table()
    );
    conn.execute(
        &sql,
        params![
            id,
            user_id,
            input.description,
            input.category_id,
            input.amount_cents,
            input.status.as_str(),
            input.payment_method.map(|m| m.as_str()),
            input.payment_date,
            input.installment,
            now
        ],
    )
    .map_err(storage_err("failed to insert expense"))?;

    Ok(created_payload(kind.entity(), &id, input.to_row(&id, &now)))
}

pub fn update_expense_at_db_path(
    db_path: &Path,
    session: &Session,
    kind: ExpenseKind,
    req: ExpenseRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let input = ExpenseInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;
    ensure_owned_reference(&conn, OwnedReference::Category, &input.category_id, user_id)?;

    let now = now_timestamp();
    let sql = format!(
        r#"
        UPDATE {}
        SET description = ?1, category_id = ?2, amount_cents = ?3, status = ?4,
            payment_method = ?5, payment_date = ?6, installment = ?7, updated_at = ?8
        WHERE id = ?9 AND user_id = ?10
        "#,
        kind.table()
    );
    let affected = conn
        .execute(
            &sql,
            params![
                input.description,
                input.category_id,
                input.amount_cents,
                input.status.as_str(),
                input.payment_method.map(|m| m.as_str()),
                input.payment_date,
                input.installment,
                now,
                id,
                user_id
            ],
        )
        .map_err(storage_err("failed to update expense"))?;

    Ok(updated_payload(kind.entity(), &id, affected, input.to_row(&id, &now)))
}

/// The caller's expenses of one kind in a period, with category name and icon.
pub fn list_expenses_at_db_path(
    db_path: &Path,
    session: &Session,
    kind: ExpenseKind,
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
            e.id,
            e.description,
            e.category_id,
            c.name,
            c.icon,
            e.amount_cents,
            e.status,
            e.payment_method,
            e.payment_date,
            e.installment,
            e.created_at,
            e.updated_at
        FROM {table} e
        LEFT JOIN categories c ON c.id = e.category_id
        WHERE e.user_id = ?1 AND substr({period_col}, 1, 7) = ?2
        ORDER BY e.created_at DESC, e.id ASC
        "#,
        table = kind.table(),
        period_col = kind.report_category().period_expr(basis, Some("e")),
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_err("failed to query expenses"))?;
    let iter = stmt
        .query_map(params![user_id, period.month_key()], |row| {
            let amount_cents = row.get::<_, i64>(5)?;
            let status = row.get::<_, String>(6)?;
            Ok((
                amount_cents,
                status.clone(),
                json!({
                    "id": row.get::<_, String>(0)?,
                    "description": row.get::<_, String>(1)?,
                    "category_id": row.get::<_, String>(2)?,
                    "category_name": row.get::<_, Option<String>>(3)?,
                    "category_icon": row.get::<_, Option<String>>(4)?,
                    "amount_cents": amount_cents,
                    "amount_text": cents_to_text(amount_cents),
                    "status": status,
                    "payment_method": row.get::<_, Option<String>>(7)?,
                    "payment_date": row.get::<_, Option<String>>(8)?,
                    "installment": row.get::<_, Option<String>>(9)?,
                    "created_at": row.get::<_, String>(10)?,
                    "updated_at": row.get::<_, String>(11)?,
                }),
            ))
        })
        .map_err(storage_err("failed to query expenses"))?;

    let mut rows = Vec::new();
    let mut total = 0_i64;
    let mut paid = 0_i64;
    let mut outstanding = 0_i64;
    for item in iter {
        let (amount_cents, status, row) = item.map_err(storage_err("failed to read expense"))?;
        total = total.saturating_add(amount_cents);
        if status == ExpenseStatus::Paid.as_str() {
            paid = paid.saturating_add(amount_cents);
        } else {
            outstanding = outstanding.saturating_add(amount_cents);
        }
        rows.push(row);
    }

    let mut summary = period_list_summary(period, basis, rows.len(), total);
    summary["paid_cents"] = json!(paid);
    summary["paid_text"] = json!(cents_to_text(paid));
    summary["outstanding_cents"] = json!(outstanding);
    summary["outstanding_text"] = json!(cents_to_text(outstanding));
    Ok(json!({
        "summary": summary,
        "rows": rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::{create_category_at_db_path, CategoryRequest};
    use crate::period_aggregator::query_general_report_at_db_path;
    use crate::test_support::{backdate, created_id, migrated_temp_db, seed_user, v_i64, v_str};

    fn seed_category(db_path: &Path, session: &Session) -> String {
        let created = create_category_at_db_path(
            db_path,
            session,
            CategoryRequest {
                name: Some("Housing".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        created_id(&created)
    }

    fn rent(category_id: &str) -> ExpenseRequest {
        ExpenseRequest {
            description: Some("Rent".to_string()),
            category_id: Some(category_id.to_string()),
            amount: Some("300.25".to_string()),
            status: Some("paid".to_string()),
            payment_method: Some("pix".to_string()),
            payment_date: Some("2024-03-10".to_string()),
            ..Default::default()
        }
    }

    fn march_2024() -> PeriodQueryRequest {
        PeriodQueryRequest {
            month: Some("3".to_string()),
            year: Some("2024".to_string()),
            period_basis: None,
        }
    }

    #[test]
    fn create_then_list_in_its_period() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        let category_id = seed_category(&db_path, &session);

        let created =
            create_expense_at_db_path(&db_path, &session, ExpenseKind::Fixed, rent(&category_id))
                .unwrap();
        assert_eq!(v_str(&created, &["row", "status"]), "paid");
        backdate(&db_path, "fixed_expenses", &created_id(&created), "2024-03-10 09:00:00");

        let listed = list_expenses_at_db_path(
            &db_path,
            &session,
            ExpenseKind::Fixed,
            march_2024(),
            PeriodBasis::CreatedAt,
        )
        .unwrap();
        assert_eq!(v_i64(&listed, &["summary", "count"]), 1);
        assert_eq!(v_str(&listed, &["summary", "total_text"]), "300.25");
        assert_eq!(v_i64(&listed, &["summary", "paid_cents"]), 30_025);
        assert_eq!(v_str(&listed, &["rows", "0", "category_name"]), "Housing");

        let variable = list_expenses_at_db_path(
            &db_path,
            &session,
            ExpenseKind::Variable,
            march_2024(),
            PeriodBasis::CreatedAt,
        )
        .unwrap();
        assert_eq!(v_i64(&variable, &["summary", "count"]), 0);
    }

    #[test]
    fn record_date_basis_follows_payment_date() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        let category_id = seed_category(&db_path, &session);
        let created =
            create_expense_at_db_path(&db_path, &session, ExpenseKind::Variable, rent(&category_id))
                .unwrap();
        backdate(&db_path, "variable_expenses", &created_id(&created), "2024-05-01 09:00:00");

        let by_payment = list_expenses_at_db_path(
            &db_path,
            &session,
            ExpenseKind::Variable,
            PeriodQueryRequest {
                period_basis: Some("record_date".to_string()),
                ..march_2024()
            },
            PeriodBasis::CreatedAt,
        )
        .unwrap();
        assert_eq!(v_i64(&by_payment, &["summary", "count"]), 1);
        assert_eq!(v_str(&by_payment, &["summary", "period_basis"]), "record_date");
    }

    #[test]
    fn updating_with_identical_values_keeps_totals() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        let category_id = seed_category(&db_path, &session);
        let created =
            create_expense_at_db_path(&db_path, &session, ExpenseKind::Fixed, rent(&category_id))
                .unwrap();
        let id = created_id(&created);
        backdate(&db_path, "fixed_expenses", &id, "2024-03-10 09:00:00");

        let before =
            query_general_report_at_db_path(&db_path, &session, march_2024(), PeriodBasis::CreatedAt)
                .unwrap();
        let mut same = rent(&category_id);
        same.id = Some(id);
        let updated =
            update_expense_at_db_path(&db_path, &session, ExpenseKind::Fixed, same).unwrap();
        assert_eq!(v_i64(&updated, &["affected_rows"]), 1);
        let after =
            query_general_report_at_db_path(&db_path, &session, march_2024(), PeriodBasis::CreatedAt)
                .unwrap();
        assert_eq!(before["categories"], after["categories"]);
        assert_eq!(before["available_balance_cents"], after["available_balance_cents"]);
    }

    #[test]
    fn rejects_bad_enums_and_foreign_categories() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        seed_user(&db_path, "user_b");
        let owner = Session::authenticated("user_a");
        let category_id = seed_category(&db_path, &owner);

        let mut bad_status = rent(&category_id);
        bad_status.status = Some("late".to_string());
        let err = create_expense_at_db_path(&db_path, &owner, ExpenseKind::Fixed, bad_status)
            .unwrap_err();
        assert_eq!(err.field(), Some("status"));

        let mut bad_amount = rent(&category_id);
        bad_amount.amount = Some("12.345".to_string());
        let err = create_expense_at_db_path(&db_path, &owner, ExpenseKind::Fixed, bad_amount)
            .unwrap_err();
        assert_eq!(err.field(), Some("amount"));

        let err = create_expense_at_db_path(
            &db_path,
            &Session::authenticated("user_b"),
            ExpenseKind::Fixed,
            rent(&category_id),
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("category_id"));
    }
}
