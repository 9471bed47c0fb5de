use rusqlite::params;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger_db::{open_ledger_connection, LEDGER_DATA_TABLES};
use crate::session::Session;
use crate::validation::{now_timestamp, required_text};

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

fn normalize_email(raw: Option<&str>) -> LedgerResult<String> {
    let email = required_text(raw, "email")?.to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(LedgerError::validation("email", "email is not a valid address"));
    }
    Ok(email)
}

/// Creates the owner row every ledger table hangs off.
pub fn register_user_at_db_path(db_path: &Path, req: RegisterUserRequest) -> LedgerResult<Value> {
    let name = required_text(req.name.as_deref(), "name")?;
    let email = normalize_email(req.email.as_deref())?;

    let conn = open_ledger_connection(db_path)?;
    let taken = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            [&email],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|e| LedgerError::storage(format!("failed to check email: {e}")))?;
    if taken != 0 {
        warn!("rejected registration: email already registered");
        return Err(LedgerError::validation("email", "email is already registered"));
    }

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO users(id, name, email, is_active, created_at, updated_at)
        VALUES (?1, ?2, ?3, 1, ?4, ?4)
        "#,
        params![id, name, email, now],
    )
    .map_err(|e| LedgerError::storage(format!("failed to insert user: {e}")))?;
    info!(user_id = %id, "registered user");

    Ok(json!({
        "created": true,
        "id": id,
        "affected_rows": 1,
        "row": {
            "id": id,
            "name": name,
            "email": email,
            "is_active": true,
            "created_at": now,
            "updated_at": now,
        }
    }))
}

/// Removes the caller; the store cascades every owned row.
pub fn delete_user_at_db_path(db_path: &Path, session: &Session) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let mut conn = open_ledger_connection(db_path)?;
    let tx = conn
        .transaction()
        .map_err(|e| LedgerError::storage(format!("failed to begin transaction: {e}")))?;

    let mut cascaded = Map::new();
    for table in LEDGER_DATA_TABLES.iter().filter(|t| **t != "users") {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE user_id = ?1");
        let count = tx
            .query_row(&sql, [user_id], |row| row.get::<_, i64>(0))
            .map_err(|e| LedgerError::storage(format!("failed to count {table}: {e}")))?;
        cascaded.insert((*table).to_string(), json!(count));
    }
    let affected = tx
        .execute("DELETE FROM users WHERE id = ?1", [user_id])
        .map_err(|e| LedgerError::storage(format!("failed to delete user: {e}")))?;
    tx.commit()
        .map_err(|e| LedgerError::storage(format!("failed to commit transaction: {e}")))?;
    info!(user_id, affected, "deleted user");

    Ok(json!({
        "deleted": affected > 0,
        "id": user_id,
        "affected_rows": affected,
        "cascaded": cascaded,
    }))
}
