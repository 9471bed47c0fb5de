pub mod admin_health;
pub mod annual_rollup;
pub mod bank_accounts;
pub mod categories;
pub mod config;
pub mod debts;
pub mod error;
pub mod expenses;
pub mod goals;
pub mod http_api;
pub mod incomes;
pub mod investments;
pub mod ledger_db;
pub mod money;
pub mod period;
pub mod period_aggregator;
mod record_mutations;
pub mod session;
pub mod users;
pub mod validation;
pub mod view_events;

#[cfg(test)]
mod test_support;

pub use admin_health::runtime_db_health_check_at_db_path;
pub use annual_rollup::{query_annual_report_at_db_path, rollup_year, AnnualQueryRequest, MonthRollup};
pub use config::AppConfig;
pub use error::{LedgerError, LedgerResult};
pub use http_api::{build_router, serve, AppState, USER_ID_HEADER};
pub use ledger_db::{
    apply_embedded_migrations, inspect_status_at_db_path, open_ledger_connection,
    query_db_stats_at_db_path,
};
pub use period::{Period, PeriodBasis};
pub use period_aggregator::{
    aggregate_period, query_dashboard_summary_at_db_path, query_general_report_at_db_path,
    PeriodQueryRequest, PeriodTotals, ReportCategory,
};
pub use record_mutations::RecordDeleteRequest;
pub use session::{resolve_session_at_db_path, Session};
pub use view_events::{LedgerView, StaleView, ViewEvents};
