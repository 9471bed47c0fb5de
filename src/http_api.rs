use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::admin_health::runtime_db_health_check_at_db_path;
use crate::annual_rollup::{query_annual_report_at_db_path, AnnualQueryRequest};
use crate::bank_accounts::{
    create_bank_account_at_db_path, list_bank_accounts_at_db_path, update_bank_account_at_db_path,
    BankAccountRequest,
};
use crate::categories::{
    create_category_at_db_path, delete_category_at_db_path, list_categories_at_db_path,
    update_category_at_db_path, CategoryRequest,
};
use crate::config::AppConfig;
use crate::debts::{create_debt_at_db_path, list_debts_at_db_path, update_debt_at_db_path, DebtRequest};
use crate::error::{LedgerError, LedgerResult};
use crate::expenses::{
    create_expense_at_db_path, list_expenses_at_db_path, update_expense_at_db_path, ExpenseKind,
    ExpenseRequest,
};
use crate::goals::{
    create_goal_at_db_path, delete_goal_at_db_path, list_goals_at_db_path, update_goal_at_db_path,
    GoalRequest,
};
use crate::incomes::{
    create_income_at_db_path, list_incomes_at_db_path, update_income_at_db_path, IncomeRequest,
};
use crate::investments::{
    create_investment_at_db_path, list_investments_at_db_path, update_investment_at_db_path,
    InvestmentRequest,
};
use crate::ledger_db::apply_embedded_migrations;
use crate::period::PeriodBasis;
use crate::period_aggregator::{
    query_dashboard_summary_at_db_path, query_general_report_at_db_path, PeriodQueryRequest,
};
use crate::record_mutations::RecordDeleteRequest;
use crate::session::{resolve_session_at_db_path, Session};
use crate::users::{delete_user_at_db_path, register_user_at_db_path, RegisterUserRequest};
use crate::view_events::{LedgerView, ViewEvents};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
pub struct AppState {
    pub db_path: Arc<PathBuf>,
    pub period_basis: PeriodBasis,
    pub views: ViewEvents,
}

impl AppState {
    pub fn new(db_path: impl Into<PathBuf>, period_basis: PeriodBasis) -> Self {
        AppState {
            db_path: Arc::new(db_path.into()),
            period_basis,
            views: ViewEvents::new(),
        }
    }
}

pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LedgerError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Storage(_) | LedgerError::Config(_) | LedgerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(category = self.0.category(), error = %self.0, "request failed");
        } else {
            warn!(category = self.0.category(), field = ?self.0.field(), "request rejected");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;
type JsonBody<T> = Result<Json<T>, JsonRejection>;
type QueryParams<T> = Result<Query<T>, QueryRejection>;

fn body<T>(raw: JsonBody<T>) -> Result<T, ApiError> {
    raw.map(|Json(v)| v)
        .map_err(|e| LedgerError::validation("body", e.body_text()).into())
}

fn query<T>(raw: QueryParams<T>) -> Result<T, ApiError> {
    raw.map(|Query(v)| v)
        .map_err(|e| LedgerError::validation("query", e.body_text()).into())
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// SQLite work runs off the async executor, one connection per call.
async fn run_blocking<T, F>(work: F) -> LedgerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LedgerError::storage(format!("blocking task failed: {e}")))?
}

async fn read<F>(state: AppState, headers: HeaderMap, op: F) -> ApiResult
where
    F: FnOnce(&Path, &Session, PeriodBasis) -> LedgerResult<Value> + Send + 'static,
{
    let db_path = state.db_path.clone();
    let basis = state.period_basis;
    let caller = caller_id(&headers);
    let payload = run_blocking(move || {
        let db = db_path.as_path();
        let session = resolve_session_at_db_path(db, caller.as_deref())?;
        op(db, &session, basis)
    })
    .await?;
    Ok(Json(payload))
}

/// Runs a write for the resolved caller and marks `view` stale when rows changed.
async fn mutate<Req, F>(state: AppState, headers: HeaderMap, view: LedgerView, req: Req, op: F) -> ApiResult
where
    Req: Send + 'static,
    F: FnOnce(&Path, &Session, Req) -> LedgerResult<Value> + Send + 'static,
{
    let db_path = state.db_path.clone();
    let caller = caller_id(&headers);
    let (session, payload) = run_blocking(move || {
        let db = db_path.as_path();
        let session = resolve_session_at_db_path(db, caller.as_deref())?;
        let payload = op(db, &session, req)?;
        Ok((session, payload))
    })
    .await?;
    let changed = payload["affected_rows"].as_u64().map_or(true, |rows| rows > 0);
    if changed {
        state.views.invalidate(view, session.user_id());
    }
    Ok(Json(payload))
}

async fn health(State(state): State<AppState>) -> Response {
    let db_path = state.db_path.clone();
    match run_blocking(move || Ok(runtime_db_health_check_at_db_path(&db_path))).await {
        Ok(report) => {
            let status = if report["ok"].as_bool().unwrap_or(false) {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(report)).into_response()
        }
        Err(e) => ApiError(e).into_response(),
    }
}

async fn register_user(State(state): State<AppState>, raw: JsonBody<RegisterUserRequest>) -> ApiResult {
    let req = body(raw)?;
    let db_path = state.db_path.clone();
    let payload = run_blocking(move || register_user_at_db_path(&db_path, req)).await?;
    state.views.invalidate(LedgerView::Users, payload["id"].as_str());
    Ok(Json(payload))
}

async fn delete_current_user(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    mutate(state, headers, LedgerView::Users, (), |db, session, ()| {
        delete_user_at_db_path(db, session)
    })
    .await
}

async fn list_bank_accounts(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    read(state, headers, |db, session, _| list_bank_accounts_at_db_path(db, session)).await
}

async fn create_bank_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<BankAccountRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::BankAccounts, req, create_bank_account_at_db_path).await
}

async fn update_bank_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<BankAccountRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::BankAccounts, req, update_bank_account_at_db_path).await
}

async fn list_categories(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    read(state, headers, |db, session, _| list_categories_at_db_path(db, session)).await
}

async fn create_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<CategoryRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Categories, req, create_category_at_db_path).await
}

async fn update_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<CategoryRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Categories, req, update_category_at_db_path).await
}

async fn delete_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult {
    let req = RecordDeleteRequest { id: Some(id) };
    mutate(state, headers, LedgerView::Categories, req, delete_category_at_db_path).await
}

fn expense_view(kind: ExpenseKind) -> LedgerView {
    match kind {
        ExpenseKind::Fixed => LedgerView::FixedExpenses,
        ExpenseKind::Variable => LedgerView::VariableExpenses,
    }
}

async fn list_expenses(
    state: AppState,
    headers: HeaderMap,
    kind: ExpenseKind,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    let req = query(raw)?;
    read(state, headers, move |db, session, basis| {
        list_expenses_at_db_path(db, session, kind, req, basis)
    })
    .await
}

async fn create_expense(
    state: AppState,
    headers: HeaderMap,
    kind: ExpenseKind,
    raw: JsonBody<ExpenseRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, expense_view(kind), req, move |db, session, req| {
        create_expense_at_db_path(db, session, kind, req)
    })
    .await
}

async fn update_expense(
    state: AppState,
    headers: HeaderMap,
    kind: ExpenseKind,
    raw: JsonBody<ExpenseRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, expense_view(kind), req, move |db, session, req| {
        update_expense_at_db_path(db, session, kind, req)
    })
    .await
}

async fn list_fixed_expenses(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    list_expenses(state, headers, ExpenseKind::Fixed, raw).await
}

async fn create_fixed_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<ExpenseRequest>,
) -> ApiResult {
    create_expense(state, headers, ExpenseKind::Fixed, raw).await
}

async fn update_fixed_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<ExpenseRequest>,
) -> ApiResult {
    update_expense(state, headers, ExpenseKind::Fixed, raw).await
}

async fn list_variable_expenses(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    list_expenses(state, headers, ExpenseKind::Variable, raw).await
}

async fn create_variable_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<ExpenseRequest>,
) -> ApiResult {
    create_expense(state, headers, ExpenseKind::Variable, raw).await
}

async fn update_variable_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<ExpenseRequest>,
) -> ApiResult {
    update_expense(state, headers, ExpenseKind::Variable, raw).await
}

async fn list_debts(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    let req = query(raw)?;
    read(state, headers, move |db, session, basis| {
        list_debts_at_db_path(db, session, req, basis)
    })
    .await
}

async fn create_debt(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<DebtRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Debts, req, create_debt_at_db_path).await
}

async fn update_debt(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<DebtRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Debts, req, update_debt_at_db_path).await
}

async fn list_incomes(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    let req = query(raw)?;
    read(state, headers, move |db, session, basis| {
        list_incomes_at_db_path(db, session, req, basis)
    })
    .await
}

async fn create_income(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<IncomeRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Incomes, req, create_income_at_db_path).await
}

async fn update_income(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<IncomeRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Incomes, req, update_income_at_db_path).await
}

async fn list_investments(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    let req = query(raw)?;
    read(state, headers, move |db, session, basis| {
        list_investments_at_db_path(db, session, req, basis)
    })
    .await
}

async fn create_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<InvestmentRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Investments, req, create_investment_at_db_path).await
}

async fn update_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<InvestmentRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Investments, req, update_investment_at_db_path).await
}

async fn list_goals(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    read(state, headers, |db, session, _| list_goals_at_db_path(db, session)).await
}

async fn create_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<GoalRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Goals, req, create_goal_at_db_path).await
}

async fn update_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: JsonBody<GoalRequest>,
) -> ApiResult {
    let req = body(raw)?;
    mutate(state, headers, LedgerView::Goals, req, update_goal_at_db_path).await
}

async fn delete_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> ApiResult {
    let req = RecordDeleteRequest { id: Some(id) };
    mutate(state, headers, LedgerView::Goals, req, delete_goal_at_db_path).await
}

async fn dashboard_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    let req = query(raw)?;
    read(state, headers, move |db, session, basis| {
        query_dashboard_summary_at_db_path(db, session, req, basis)
    })
    .await
}

async fn general_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<PeriodQueryRequest>,
) -> ApiResult {
    let req = query(raw)?;
    read(state, headers, move |db, session, basis| {
        query_general_report_at_db_path(db, session, req, basis)
    })
    .await
}

async fn annual_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: QueryParams<AnnualQueryRequest>,
) -> ApiResult {
    let req = query(raw)?;
    read(state, headers, move |db, session, basis| {
        query_annual_report_at_db_path(db, session, req, basis)
    })
    .await
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users", post(register_user))
        .route("/users/me", delete(delete_current_user))
        .route(
            "/bank-accounts",
            get(list_bank_accounts).post(create_bank_account).put(update_bank_account),
        )
        .route(
            "/categories",
            get(list_categories).post(create_category).put(update_category),
        )
        .route("/categories/:id", delete(delete_category))
        .route(
            "/fixed-expenses",
            get(list_fixed_expenses).post(create_fixed_expense).put(update_fixed_expense),
        )
        .route(
            "/variable-expenses",
            get(list_variable_expenses)
                .post(create_variable_expense)
                .put(update_variable_expense),
        )
        .route("/debts", get(list_debts).post(create_debt).put(update_debt))
        .route("/incomes", get(list_incomes).post(create_income).put(update_income))
        .route(
            "/investments",
            get(list_investments).post(create_investment).put(update_investment),
        )
        .route("/goals", get(list_goals).post(create_goal).put(update_goal))
        .route("/goals/:id", delete(delete_goal))
        .route("/dashboard/summary", get(dashboard_summary))
        .route("/reports/general", get(general_report))
        .route("/reports/annual", get(annual_report))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Migrates the database, then serves the JSON API until Ctrl-C.
pub async fn serve(config: AppConfig) -> LedgerResult<()> {
    let db_path = config.db_path.clone();
    let migrated = run_blocking(move || apply_embedded_migrations(&db_path)).await?;
    info!(
        db_path = %migrated.db_path,
        applied_now = migrated.applied_now.len(),
        applied_total = migrated.applied_total,
        "ledger schema is ready"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, basis = config.period_basis.as_str(), "fincontrol listening");

    let app = build_router(AppState::new(config.db_path, config.period_basis));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
