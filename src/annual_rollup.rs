use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger_db::open_ledger_connection;
use crate::money::{cents_to_display_value, cents_to_text};
use crate::period::{parse_year_or_current, Period, PeriodBasis};
use crate::period_aggregator::{aggregate_period, ReportCategory};
use crate::session::Session;

const ANNUAL_CATEGORIES: &[ReportCategory] = &[
    ReportCategory::Income,
    ReportCategory::FixedExpenses,
    ReportCategory::VariableExpenses,
];

#[derive(Debug, Default, Deserialize)]
pub struct AnnualQueryRequest {
    pub year: Option<String>,
    pub period_basis: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRollup {
    pub month: u32,
    pub income_cents: i64,
    pub expenses_cents: i64,
}

impl MonthRollup {
    pub fn balance_cents(&self) -> LedgerResult<i64> {
        self.income_cents
            .checked_sub(self.expenses_cents)
            .ok_or_else(|| LedgerError::storage("amount total is out of range"))
    }
}

/// One aggregation per month, January to December, in order.
pub fn rollup_year(
    conn: &rusqlite::Connection,
    user_id: &str,
    year: i32,
    basis: PeriodBasis,
) -> LedgerResult<Vec<MonthRollup>> {
    let mut months = Vec::with_capacity(12);
    for month in 1..=12_u32 {
        let totals = aggregate_period(conn, user_id, Period::new(month, year)?, basis, ANNUAL_CATEGORIES)?;
        months.push(MonthRollup {
            month,
            income_cents: totals.get(ReportCategory::Income).total_cents,
            expenses_cents: totals.total_expenses_cents()?,
        });
    }
    Ok(months)
}

fn month_row_json(year: i32, m: &MonthRollup) -> LedgerResult<Value> {
    let balance = m.balance_cents()?;
    Ok(json!({
        "month": m.month,
        "month_key": format!("{:04}-{:02}", year, m.month),
        "income_cents": m.income_cents,
        "income_text": cents_to_text(m.income_cents),
        "income_value": cents_to_display_value(m.income_cents),
        "expenses_cents": m.expenses_cents,
        "expenses_text": cents_to_text(m.expenses_cents),
        "expenses_value": cents_to_display_value(m.expenses_cents),
        "balance_cents": balance,
        "balance_text": cents_to_text(balance),
    }))
}

/// Twelve monthly rows plus year totals. Anonymous callers get `null`.
pub fn query_annual_report_at_db_path(
    db_path: &Path,
    session: &Session,
    req: AnnualQueryRequest,
    default_basis: PeriodBasis,
) -> LedgerResult<Value> {
    let Some(user_id) = session.user_id() else {
        return Ok(Value::Null);
    };
    let year = parse_year_or_current(req.year.as_deref())?;
    let basis = PeriodBasis::from_request(req.period_basis.as_deref(), default_basis)?;

    let conn = open_ledger_connection(db_path)?;
    let months = rollup_year(&conn, user_id, year, basis)?;

    let mut rows = Vec::with_capacity(months.len());
    let mut income_total = 0_i64;
    let mut expenses_total = 0_i64;
    // First month wins ties.
    let mut best: Option<(u32, i64)> = None;
    let mut worst: Option<(u32, i64)> = None;
    for m in &months {
        rows.push(month_row_json(year, m)?);
        income_total = income_total
            .checked_add(m.income_cents)
            .ok_or_else(|| LedgerError::storage("amount total is out of range"))?;
        expenses_total = expenses_total
            .checked_add(m.expenses_cents)
            .ok_or_else(|| LedgerError::storage("amount total is out of range"))?;
        let balance = m.balance_cents()?;
        if best.map(|(_, b)| balance > b).unwrap_or(true) {
            best = Some((m.month, balance));
        }
        if worst.map(|(_, w)| balance < w).unwrap_or(true) {
            worst = Some((m.month, balance));
        }
    }
    let balance_total = income_total
        .checked_sub(expenses_total)
        .ok_or_else(|| LedgerError::storage("amount total is out of range"))?;
    let active_months = months
        .iter()
        .filter(|m| m.income_cents != 0 || m.expenses_cents != 0)
        .count();

    Ok(json!({
        "year": year,
        "analysis_scope": {
            "period_basis": basis.as_str(),
            "categories": ANNUAL_CATEGORIES.iter().map(|c| c.key()).collect::<Vec<_>>(),
        },
        "summary": {
            "income_total_cents": income_total,
            "income_total_text": cents_to_text(income_total),
            "expenses_total_cents": expenses_total,
            "expenses_total_text": cents_to_text(expenses_total),
            "balance_total_cents": balance_total,
            "balance_total_text": cents_to_text(balance_total),
            "active_months": active_months,
            "best_month": best.map(|(month, _)| month),
            "best_month_balance_cents": best.map(|(_, b)| b),
            "worst_month": worst.map(|(month, _)| month),
            "worst_month_balance_cents": worst.map(|(_, w)| w),
        },
        "rows": rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period_aggregator::{query_general_report_at_db_path, PeriodQueryRequest};
    use crate::test_support::{migrated_temp_db, seed_user, v_i64};

    fn seed_year(db_path: &Path) {
        seed_user(db_path, "user_a");
        let conn = open_ledger_connection(db_path).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO bank_accounts(id, user_id, bank_name, branch, account_number, created_at, updated_at)
            VALUES ('ba', 'user_a', 'Banco', '1', '1', '2024-01-01 00:00:00', '2024-01-01 00:00:00');
            INSERT INTO categories(id, user_id, name, created_at, updated_at)
            VALUES ('cat', 'user_a', 'Home', '2024-01-01 00:00:00', '2024-01-01 00:00:00');
            INSERT INTO incomes(id, user_id, description, income_date, amount_cents, bank_account_id, created_at, updated_at)
            VALUES ('i1', 'user_a', 'Salary', '2024-01-05', 500000, 'ba', '2024-01-05 08:00:00', '2024-01-05 08:00:00'),
                   ('i3', 'user_a', 'Salary', '2024-03-05', 150050, 'ba', '2024-03-05 08:00:00', '2024-03-05 08:00:00'),
                   ('i_prev', 'user_a', 'Bonus', '2023-12-20', 999900, 'ba', '2023-12-20 08:00:00', '2023-12-20 08:00:00');
            INSERT INTO fixed_expenses(id, user_id, description, category_id, amount_cents, created_at, updated_at)
            VALUES ('f3', 'user_a', 'Rent', 'cat', 30025, '2024-03-10 08:00:00', '2024-03-10 08:00:00');
            INSERT INTO variable_expenses(id, user_id, description, category_id, amount_cents, created_at, updated_at)
            VALUES ('v7', 'user_a', 'Trip', 'cat', 80000, '2024-07-10 08:00:00', '2024-07-10 08:00:00');
            INSERT INTO debts(id, user_id, description, amount_cents, due_date, created_at, updated_at)
            VALUES ('d3', 'user_a', 'Loan', 12345, '2024-03-30', '2024-03-11 08:00:00', '2024-03-11 08:00:00');
            "#,
        )
        .unwrap();
    }

    fn annual(db_path: &Path) -> Value {
        query_annual_report_at_db_path(
            db_path,
            &Session::authenticated("user_a"),
            AnnualQueryRequest {
                year: Some("2024".to_string()),
                period_basis: None,
            },
            PeriodBasis::CreatedAt,
        )
        .unwrap()
    }

    #[test]
    fn twelve_rows_in_month_order() {
        let (_dir, db_path) = migrated_temp_db();
        seed_year(&db_path);

        let report = annual(&db_path);
        let rows = report["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 12);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(v_i64(row, &["month"]), i as i64 + 1);
        }
        assert_eq!(v_i64(&rows[0], &["income_cents"]), 500_000);
        assert_eq!(v_i64(&rows[1], &["income_cents"]), 0);
        // Debts are not part of the annual expense figure.
        assert_eq!(v_i64(&rows[2], &["expenses_cents"]), 30_025);
        assert_eq!(v_i64(&rows[6], &["balance_cents"]), -80_000);
    }

    #[test]
    fn rows_match_per_month_reports() {
        let (_dir, db_path) = migrated_temp_db();
        seed_year(&db_path);
        let report = annual(&db_path);

        for month in 1..=12 {
            let general = query_general_report_at_db_path(
                &db_path,
                &Session::authenticated("user_a"),
                PeriodQueryRequest {
                    month: Some(month.to_string()),
                    year: Some("2024".to_string()),
                    period_basis: None,
                },
                PeriodBasis::CreatedAt,
            )
            .unwrap();
            let row = &report["rows"][month - 1];
            assert_eq!(
                v_i64(row, &["income_cents"]),
                v_i64(&general, &["categories", "income", "total_cents"])
            );
            assert_eq!(
                v_i64(row, &["expenses_cents"]),
                v_i64(&general, &["total_expenses_cents"])
            );
        }
    }

    #[test]
    fn summary_totals_and_extremes() {
        let (_dir, db_path) = migrated_temp_db();
        seed_year(&db_path);
        let report = annual(&db_path);

        assert_eq!(v_i64(&report, &["summary", "income_total_cents"]), 650_050);
        assert_eq!(v_i64(&report, &["summary", "expenses_total_cents"]), 110_025);
        assert_eq!(v_i64(&report, &["summary", "balance_total_cents"]), 540_025);
        assert_eq!(v_i64(&report, &["summary", "active_months"]), 3);
        assert_eq!(v_i64(&report, &["summary", "best_month"]), 1);
        assert_eq!(v_i64(&report, &["summary", "worst_month"]), 7);
    }

    #[test]
    fn anonymous_annual_report_is_null() {
        let (_dir, db_path) = migrated_temp_db();
        let report = query_annual_report_at_db_path(
            &db_path,
            &Session::Anonymous,
            AnnualQueryRequest::default(),
            PeriodBasis::CreatedAt,
        )
        .unwrap();
        assert!(report.is_null());
    }

    #[test]
    fn invalid_year_names_the_field() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let err = query_annual_report_at_db_path(
            &db_path,
            &Session::authenticated("user_a"),
            AnnualQueryRequest {
                year: Some("20xx".to_string()),
                period_basis: None,
            },
            PeriodBasis::CreatedAt,
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("year"));
    }
}
