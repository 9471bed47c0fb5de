use rusqlite::OptionalExtension;
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger_db::open_ledger_connection;

/// Caller identity passed explicitly into every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Authenticated { user_id: String },
    Anonymous,
}

impl Session {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Session::Authenticated {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Session::Authenticated { user_id } => Some(user_id.as_str()),
            Session::Anonymous => None,
        }
    }

    /// Write paths reject anonymous callers outright.
    pub fn require_user(&self) -> LedgerResult<&str> {
        self.user_id().ok_or(LedgerError::Unauthenticated)
    }
}

/// Maps a raw caller id to a session. Unknown or inactive users are anonymous.
pub fn resolve_session_at_db_path(db_path: &Path, raw_user_id: Option<&str>) -> LedgerResult<Session> {
    let user_id = raw_user_id.unwrap_or("").trim();
    if user_id.is_empty() {
        return Ok(Session::Anonymous);
    }
    let conn = open_ledger_connection(db_path)?;
    let found = conn
        .query_row(
            "SELECT id FROM users WHERE id = ?1 AND is_active = 1",
            [user_id],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| LedgerError::storage(format!("failed to resolve session: {e}")))?;
    Ok(match found {
        Some(id) => Session::authenticated(id),
        None => Session::Anonymous,
    })
}
