use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger_db::open_ledger_connection;
use crate::money::{cents_to_display_value, cents_to_text};
use crate::period::{Period, PeriodBasis};
use crate::session::Session;

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQueryRequest {
    pub month: Option<String>,
    pub year: Option<String>,
    pub period_basis: Option<String>,
}

/// Transaction tables that feed the monthly report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportCategory {
    Income,
    FixedExpenses,
    VariableExpenses,
    Debts,
    Investments,
}

pub const ALL_REPORT_CATEGORIES: &[ReportCategory] = &[
    ReportCategory::Income,
    ReportCategory::FixedExpenses,
    ReportCategory::VariableExpenses,
    ReportCategory::Debts,
    ReportCategory::Investments,
];

impl ReportCategory {
    pub fn key(&self) -> &'static str {
        match self {
            ReportCategory::Income => "income",
            ReportCategory::FixedExpenses => "fixed_expenses",
            ReportCategory::VariableExpenses => "variable_expenses",
            ReportCategory::Debts => "debts",
            ReportCategory::Investments => "investments",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            ReportCategory::Income => "incomes",
            ReportCategory::FixedExpenses => "fixed_expenses",
            ReportCategory::VariableExpenses => "variable_expenses",
            ReportCategory::Debts => "debts",
            ReportCategory::Investments => "investments",
        }
    }

    /// Date columns in priority order; the first non-null one is used.
    fn record_date_columns(&self) -> &'static [&'static str] {
        match self {
            ReportCategory::Income => &["income_date"],
            ReportCategory::FixedExpenses | ReportCategory::VariableExpenses => {
                &["payment_date", "created_at"]
            }
            ReportCategory::Debts => &["due_date"],
            ReportCategory::Investments => &["investment_date"],
        }
    }

    /// Column expression whose `YYYY-MM` prefix decides the period.
    /// `alias` qualifies the columns when the table is aliased in a join.
    pub fn period_expr(&self, basis: PeriodBasis, alias: Option<&str>) -> String {
        let qualify = |col: &str| match alias {
            Some(a) => format!("{a}.{col}"),
            None => col.to_string(),
        };
        let columns: &[&str] = match basis {
            PeriodBasis::CreatedAt => &["created_at"],
            PeriodBasis::RecordDate => self.record_date_columns(),
        };
        match columns {
            [single] => qualify(*single),
            many => format!(
                "COALESCE({})",
                many.iter().map(|c| qualify(*c)).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryTotal {
    pub total_cents: i64,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct PeriodTotals {
    pub period: Period,
    pub basis: PeriodBasis,
    totals: Vec<(ReportCategory, CategoryTotal)>,
}

impl PeriodTotals {
    /// Categories that were not aggregated read as zero.
    pub fn get(&self, category: ReportCategory) -> CategoryTotal {
        self.totals
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, t)| *t)
            .unwrap_or_default()
    }

    pub fn total_expenses_cents(&self) -> LedgerResult<i64> {
        self.get(ReportCategory::FixedExpenses)
            .total_cents
            .checked_add(self.get(ReportCategory::VariableExpenses).total_cents)
            .ok_or_else(overflow)
    }

    /// income - expenses - debts - investments
    pub fn available_balance_cents(&self) -> LedgerResult<i64> {
        self.get(ReportCategory::Income)
            .total_cents
            .checked_sub(self.total_expenses_cents()?)
            .and_then(|v| v.checked_sub(self.get(ReportCategory::Debts).total_cents))
            .and_then(|v| v.checked_sub(self.get(ReportCategory::Investments).total_cents))
            .ok_or_else(overflow)
    }
}

fn overflow() -> LedgerError {
    LedgerError::storage("amount total is out of range")
}

fn aggregate_category(
    conn: &Connection,
    user_id: &str,
    month_key: &str,
    category: ReportCategory,
    basis: PeriodBasis,
) -> LedgerResult<CategoryTotal> {
    let sql = format!(
        "SELECT COALESCE(SUM(amount_cents), 0), COUNT(*) FROM {} WHERE user_id = ?1 AND substr({}, 1, 7) = ?2",
        category.table(),
        category.period_expr(basis, None)
    );
    conn.query_row(&sql, [user_id, month_key], |row| {
        Ok(CategoryTotal {
            total_cents: row.get::<_, i64>(0)?,
            count: row.get::<_, i64>(1)?,
        })
    })
    .map_err(|e| LedgerError::storage(format!("failed to aggregate {}: {e}", category.table())))
}

/// Sums each requested category for one user and month.
pub fn aggregate_period(
    conn: &Connection,
    user_id: &str,
    period: Period,
    basis: PeriodBasis,
    categories: &[ReportCategory],
) -> LedgerResult<PeriodTotals> {
    let month_key = period.month_key();
    let mut totals = Vec::with_capacity(categories.len());
    for category in categories {
        let total = aggregate_category(conn, user_id, &month_key, *category, basis)?;
        totals.push((*category, total));
    }
    debug!(user_id, month = %month_key, basis = basis.as_str(), "aggregated period");
    Ok(PeriodTotals {
        period,
        basis,
        totals,
    })
}

pub(crate) fn resolve_period_request(
    req: &PeriodQueryRequest,
    default_basis: PeriodBasis,
) -> LedgerResult<(Period, PeriodBasis)> {
    let period = Period::from_params(req.month.as_deref(), req.year.as_deref())?;
    let basis = PeriodBasis::from_request(req.period_basis.as_deref(), default_basis)?;
    Ok((period, basis))
}

fn summary_json(
    period: Period,
    basis: PeriodBasis,
    income: i64,
    expenses: i64,
    debts: i64,
    investments: i64,
    balance: i64,
) -> Value {
    json!({
        "month": period.month,
        "year": period.year,
        "analysis_scope": {
            "period_basis": basis.as_str(),
            "month_key": period.month_key(),
        },
        "summary": {
            "total_income_cents": income,
            "total_income_text": cents_to_text(income),
            "total_income_value": cents_to_display_value(income),
            "total_expenses_cents": expenses,
            "total_expenses_text": cents_to_text(expenses),
            "total_expenses_value": cents_to_display_value(expenses),
            "total_debts_cents": debts,
            "total_debts_text": cents_to_text(debts),
            "total_debts_value": cents_to_display_value(debts),
            "total_investments_cents": investments,
            "total_investments_text": cents_to_text(investments),
            "total_investments_value": cents_to_display_value(investments),
            "available_balance_cents": balance,
            "available_balance_text": cents_to_text(balance),
            "available_balance_value": cents_to_display_value(balance),
        }
    })
}

/// Dashboard cards. Anonymous callers see an all-zero summary.
pub fn query_dashboard_summary_at_db_path(
    db_path: &Path,
    session: &Session,
    req: PeriodQueryRequest,
    default_basis: PeriodBasis,
) -> LedgerResult<Value> {
    let Some(user_id) = session.user_id() else {
        let (period, basis) = resolve_period_request(&req, default_basis)
            .unwrap_or_else(|_| (Period::current(), default_basis));
        return Ok(summary_json(period, basis, 0, 0, 0, 0, 0));
    };
    let (period, basis) = resolve_period_request(&req, default_basis)?;

    let conn = open_ledger_connection(db_path)?;
    let totals = aggregate_period(&conn, user_id, period, basis, ALL_REPORT_CATEGORIES)?;
    Ok(summary_json(
        period,
        basis,
        totals.get(ReportCategory::Income).total_cents,
        totals.total_expenses_cents()?,
        totals.get(ReportCategory::Debts).total_cents,
        totals.get(ReportCategory::Investments).total_cents,
        totals.available_balance_cents()?,
    ))
}

fn category_json(total: CategoryTotal) -> Value {
    json!({
        "total_cents": total.total_cents,
        "total_text": cents_to_text(total.total_cents),
        "total_value": cents_to_display_value(total.total_cents),
        "count": total.count,
    })
}

/// Per-category totals and counts. Anonymous callers get `null`.
pub fn query_general_report_at_db_path(
    db_path: &Path,
    session: &Session,
    req: PeriodQueryRequest,
    default_basis: PeriodBasis,
) -> LedgerResult<Value> {
    let Some(user_id) = session.user_id() else {
        return Ok(Value::Null);
    };
    let (period, basis) = resolve_period_request(&req, default_basis)?;

    let conn = open_ledger_connection(db_path)?;
    let totals = aggregate_period(&conn, user_id, period, basis, ALL_REPORT_CATEGORIES)?;
    let total_expenses = totals.total_expenses_cents()?;
    let balance = totals.available_balance_cents()?;

    let mut categories = serde_json::Map::new();
    for category in ALL_REPORT_CATEGORIES {
        categories.insert(category.key().to_string(), category_json(totals.get(*category)));
    }

    Ok(json!({
        "month": period.month,
        "year": period.year,
        "analysis_scope": {
            "period_basis": basis.as_str(),
            "month_key": period.month_key(),
        },
        "categories": categories,
        "total_expenses_cents": total_expenses,
        "total_expenses_text": cents_to_text(total_expenses),
        "total_expenses_value": cents_to_display_value(total_expenses),
        "available_balance_cents": balance,
        "available_balance_text": cents_to_text(balance),
        "available_balance_value": cents_to_display_value(balance),
    }))
}
