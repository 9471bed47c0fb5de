use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::validation::now_timestamp;

const VIEW_EVENT_CAPACITY: usize = 256;

/// Screens whose data a mutation can make stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerView {
    BankAccounts,
    Categories,
    FixedExpenses,
    VariableExpenses,
    Debts,
    Incomes,
    Investments,
    Goals,
    Users,
}

impl LedgerView {
    pub fn path(&self) -> &'static str {
        match self {
            LedgerView::BankAccounts => "/bank-accounts",
            LedgerView::Categories => "/categories",
            LedgerView::FixedExpenses => "/fixed-expenses",
            LedgerView::VariableExpenses => "/variable-expenses",
            LedgerView::Debts => "/debts",
            LedgerView::Incomes => "/incomes",
            LedgerView::Investments => "/investments",
            LedgerView::Goals => "/goals",
            LedgerView::Users => "/users",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleView {
    pub view: LedgerView,
    pub path: &'static str,
    pub user_id: Option<String>,
    pub at: String,
}

/// Fan-out of stale-view signals. Delivery order is not guaranteed.
#[derive(Debug, Clone)]
pub struct ViewEvents {
    sender: broadcast::Sender<StaleView>,
}

impl Default for ViewEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(VIEW_EVENT_CAPACITY);
        ViewEvents { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StaleView> {
        self.sender.subscribe()
    }

    /// Having no subscribers is not an error.
    pub fn invalidate(&self, view: LedgerView, user_id: Option<&str>) {
        let event = StaleView {
            view,
            path: view.path(),
            user_id: user_id.map(str::to_string),
            at: now_timestamp(),
        };
        info!(path = event.path, user_id = ?event.user_id, "view is stale");
        let _ = self.sender.send(event);
    }
}
