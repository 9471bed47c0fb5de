use rusqlite::params;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::ledger_db::open_ledger_connection;
use crate::money::cents_to_text;
use crate::record_mutations::{created_payload, empty_list, storage_err, updated_payload};
use crate::session::Session;
use crate::validation::{
    now_timestamp, optional_text, required_id, required_text, signed_amount_or_zero,
};

#[derive(Debug, Default, Deserialize)]
pub struct BankAccountRequest {
    pub id: Option<String>,
    pub bank_name: Option<String>,
    pub branch: Option<String>,
    pub account_number: Option<String>,
    pub pix_key: Option<String>,
    pub card_image_url: Option<String>,
    pub balance: Option<String>,
}

struct BankAccountInput {
    bank_name: String,
    branch: String,
    account_number: String,
    pix_key: Option<String>,
    card_image_url: Option<String>,
    balance_cents: i64,
}

impl BankAccountInput {
    fn parse(req: &BankAccountRequest) -> LedgerResult<Self> {
        Ok(BankAccountInput {
            bank_name: required_text(req.bank_name.as_deref(), "bank_name")?,
            branch: required_text(req.branch.as_deref(), "branch")?,
            account_number: required_text(req.account_number.as_deref(), "account_number")?,
            pix_key: optional_text(req.pix_key.as_deref()),
            card_image_url: optional_text(req.card_image_url.as_deref()),
            balance_cents: signed_amount_or_zero(req.balance.as_deref(), "balance")?,
        })
    }

    fn to_row(&self, id: &str, now: &str) -> Value {
        json!({
            "id": id,
            "bank_name": self.bank_name,
            "branch": self.branch,
            "account_number": self.account_number,
            "pix_key": self.pix_key,
            "card_image_url": self.card_image_url,
            "balance_cents": self.balance_cents,
            "balance_text": cents_to_text(self.balance_cents),
            "updated_at": now,
        })
    }
}

pub fn create_bank_account_at_db_path(
    db_path: &Path,
    session: &Session,
    req: BankAccountRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let input = BankAccountInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        r#"
        INSERT INTO bank_accounts(
            id, user_id, bank_name, branch, account_number, pix_key, card_image_url,
            balance_cents, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        "#,
        params![
            id,
            user_id,
            input.bank_name,
            input.branch,
            input.account_number,
            input.pix_key,
            input.card_image_url,
            input.balance_cents,
            now
        ],
    )
    .map_err(storage_err("failed to insert bank account"))?;

    Ok(created_payload("bank_account", &id, input.to_row(&id, &now)))
}

pub fn update_bank_account_at_db_path(
    db_path: &Path,
    session: &Session,
    req: BankAccountRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let input = BankAccountInput::parse(&req)?;
    let conn = open_ledger_connection(db_path)?;

    let now = now_timestamp();
    let affected = conn
        .execute(
            r#"
            UPDATE bank_accounts
            SET bank_name = ?1, branch = ?2, account_number = ?3, pix_key = ?4,
                card_image_url = ?5, balance_cents = ?6, updated_at = ?7
            WHERE id = ?8 AND user_id = ?9
            "#,
            params![
                input.bank_name,
                input.branch,
                input.account_number,
                input.pix_key,
                input.card_image_url,
                input.balance_cents,
                now,
                id,
                user_id
            ],
        )
        .map_err(storage_err("failed to update bank account"))?;

    Ok(updated_payload("bank_account", &id, affected, input.to_row(&id, &now)))
}

/// All of the caller's accounts with how many records point at each.
pub fn list_bank_accounts_at_db_path(db_path: &Path, session: &Session) -> LedgerResult<Value> {
    let Some(user_id) = session.user_id() else {
        return Ok(empty_list());
    };
    let conn = open_ledger_connection(db_path)?;
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                b.id,
                b.bank_name,
                b.branch,
                b.account_number,
                b.pix_key,
                b.card_image_url,
                b.balance_cents,
                b.created_at,
                b.updated_at,
                (SELECT COUNT(*) FROM incomes i WHERE i.bank_account_id = b.id) AS income_count,
                (SELECT COUNT(*) FROM goals g WHERE g.bank_account_id = b.id) AS goal_count,
                (SELECT COUNT(*) FROM investments v WHERE v.bank_account_id = b.id) AS investment_count
            FROM bank_accounts b
            WHERE b.user_id = ?1
            ORDER BY b.bank_name ASC, b.created_at ASC
            "#,
        )
        .map_err(storage_err("failed to query bank accounts"))?;

    let iter = stmt
        .query_map([user_id], |row| {
            let balance_cents = row.get::<_, i64>(6)?;
            Ok((
                balance_cents,
                json!({
                    "id": row.get::<_, String>(0)?,
                    "bank_name": row.get::<_, String>(1)?,
                    "branch": row.get::<_, String>(2)?,
                    "account_number": row.get::<_, String>(3)?,
                    "pix_key": row.get::<_, Option<String>>(4)?,
                    "card_image_url": row.get::<_, Option<String>>(5)?,
                    "balance_cents": balance_cents,
                    "balance_text": cents_to_text(balance_cents),
                    "created_at": row.get::<_, String>(7)?,
                    "updated_at": row.get::<_, String>(8)?,
                    "income_count": row.get::<_, i64>(9)?,
                    "goal_count": row.get::<_, i64>(10)?,
                    "investment_count": row.get::<_, i64>(11)?,
                }),
            ))
        })
        .map_err(storage_err("failed to query bank accounts"))?;

    let mut rows = Vec::new();
    let mut balance_total = 0_i64;
    for item in iter {
        let (balance_cents, row) = item.map_err(storage_err("failed to read bank account"))?;
        balance_total = balance_total.saturating_add(balance_cents);
        rows.push(row);
    }

    Ok(json!({
        "summary": {
            "count": rows.len(),
            "balance_total_cents": balance_total,
            "balance_total_text": cents_to_text(balance_total),
        },
        "rows": rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::test_support::{created_id, migrated_temp_db, seed_user, v_i64, v_str};

    fn account(bank: &str, balance: &str) -> BankAccountRequest {
        BankAccountRequest {
            bank_name: Some(bank.to_string()),
            branch: Some("0001".to_string()),
            account_number: Some("12345-6".to_string()),
            balance: Some(balance.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn create_list_and_update_bank_accounts() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");

        let created =
            create_bank_account_at_db_path(&db_path, &session, account("Nubank", "1,250.40")).unwrap();
        let id = created_id(&created);
        create_bank_account_at_db_path(&db_path, &session, account("Itau", "-50")).unwrap();

        let listed = list_bank_accounts_at_db_path(&db_path, &session).unwrap();
        assert_eq!(v_i64(&listed, &["summary", "count"]), 2);
        assert_eq!(v_str(&listed, &["summary", "balance_total_text"]), "1200.40");
        assert_eq!(v_str(&listed, &["rows", "0", "bank_name"]), "Itau");

        let mut update = account("Nubank PJ", "10");
        update.id = Some(id.clone());
        update.pix_key = Some("ana@example.com".to_string());
        let updated = update_bank_account_at_db_path(&db_path, &session, update).unwrap();
        assert_eq!(v_i64(&updated, &["affected_rows"]), 1);
        assert_eq!(v_str(&updated, &["row", "pix_key"]), "ana@example.com");
    }

    #[test]
    fn updates_are_scoped_to_the_owner() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        seed_user(&db_path, "user_b");
        let created = create_bank_account_at_db_path(
            &db_path,
            &Session::authenticated("user_a"),
            account("Nubank", "0"),
        )
        .unwrap();

        let mut hijack = account("Stolen", "999");
        hijack.id = Some(created_id(&created));
        let result =
            update_bank_account_at_db_path(&db_path, &Session::authenticated("user_b"), hijack).unwrap();
        assert_eq!(v_i64(&result, &["affected_rows"]), 0);
        assert!(result["row"].is_null());

        let others = list_bank_accounts_at_db_path(&db_path, &Session::authenticated("user_b")).unwrap();
        assert_eq!(v_i64(&others, &["summary", "count"]), 0);
    }

    #[test]
    fn validation_and_anonymous_rules() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let mut missing_branch = account("Nubank", "0");
        missing_branch.branch = Some("  ".to_string());
        let err = create_bank_account_at_db_path(&db_path, &Session::authenticated("user_a"), missing_branch)
            .unwrap_err();
        assert_eq!(err.field(), Some("branch"));

        let err = create_bank_account_at_db_path(&db_path, &Session::Anonymous, account("X", "0"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthenticated));

        let listed = list_bank_accounts_at_db_path(&db_path, &Session::Anonymous).unwrap();
        assert_eq!(listed["rows"].as_array().unwrap().len(), 0);
    }
}
