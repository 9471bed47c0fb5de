use rusqlite::params;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger_db::open_ledger_connection;
use crate::record_mutations::{
    count_where, created_payload, deleted_payload, empty_list, storage_err, updated_payload,
    RecordDeleteRequest,
};
use crate::session::Session;
use crate::validation::{now_timestamp, optional_text, required_id, required_text};

#[derive(Debug, Default, Deserialize)]
pub struct CategoryRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub icon: Option<String>,
}

fn parse_category(req: &CategoryRequest) -> LedgerResult<(String, Option<String>)> {
    Ok((
        required_text(req.name.as_deref(), "name")?,
        optional_text(req.icon.as_deref()),
    ))
}

pub fn create_category_at_db_path(
    db_path: &Path,
    session: &Session,
    req: CategoryRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let (name, icon) = parse_category(&req)?;
    let conn = open_ledger_connection(db_path)?;

    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO categories(id, user_id, name, icon, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, user_id, name, icon, now],
    )
    .map_err(storage_err("failed to insert category"))?;

    Ok(created_payload(
        "category",
        &id,
        json!({ "id": id, "name": name, "icon": icon, "updated_at": now }),
    ))
}

pub fn update_category_at_db_path(
    db_path: &Path,
    session: &Session,
    req: CategoryRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let (name, icon) = parse_category(&req)?;
    let conn = open_ledger_connection(db_path)?;

    let now = now_timestamp();
    let affected = conn
        .execute(
            "UPDATE categories SET name = ?1, icon = ?2, updated_at = ?3 WHERE id = ?4 AND user_id = ?5",
            params![name, icon, now, id, user_id],
        )
        .map_err(storage_err("failed to update category"))?;

    Ok(updated_payload(
        "category",
        &id,
        affected,
        json!({ "id": id, "name": name, "icon": icon, "updated_at": now }),
    ))
}

/// Deletes the category; its fixed and variable expenses go with it.
pub fn delete_category_at_db_path(
    db_path: &Path,
    session: &Session,
    req: RecordDeleteRequest,
) -> LedgerResult<Value> {
    let user_id = session.require_user()?;
    let id = required_id(req.id.as_deref())?;
    let mut conn = open_ledger_connection(db_path)?;
    let tx = conn
        .transaction()
        .map_err(|e| LedgerError::storage(format!("failed to begin transaction: {e}")))?;

    let owned = tx
        .query_row(
            "SELECT COUNT(*) FROM categories WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            |row| row.get::<_, i64>(0),
        )
        .map_err(storage_err("failed to look up category"))?;
    let (fixed, variable) = if owned > 0 {
        (
            count_where(&tx, "SELECT COUNT(*) FROM fixed_expenses WHERE category_id = ?1", &id)?,
            count_where(&tx, "SELECT COUNT(*) FROM variable_expenses WHERE category_id = ?1", &id)?,
        )
    } else {
        (0, 0)
    };
    let affected = tx
        .execute(
            "DELETE FROM categories WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )
        .map_err(storage_err("failed to delete category"))?;
    tx.commit()
        .map_err(|e| LedgerError::storage(format!("failed to commit transaction: {e}")))?;

    Ok(deleted_payload(
        "category",
        &id,
        affected,
        json!({ "fixed_expenses": fixed, "variable_expenses": variable }),
    ))
}

pub fn list_categories_at_db_path(db_path: &Path, session: &Session) -> LedgerResult<Value> {
    let Some(user_id) = session.user_id() else {
        return Ok(empty_list());
    };
    let conn = open_ledger_connection(db_path)?;
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                c.id,
                c.name,
                c.icon,
                c.created_at,
                c.updated_at,
                (SELECT COUNT(*) FROM fixed_expenses f WHERE f.category_id = c.id) AS fixed_count,
                (SELECT COUNT(*) FROM variable_expenses v WHERE v.category_id = c.id) AS variable_count
            FROM categories c
            WHERE c.user_id = ?1
            ORDER BY c.name ASC
            "#,
        )
        .map_err(storage_err("failed to query categories"))?;
    let iter = stmt
        .query_map([user_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "icon": row.get::<_, Option<String>>(2)?,
                "created_at": row.get::<_, String>(3)?,
                "updated_at": row.get::<_, String>(4)?,
                "fixed_expense_count": row.get::<_, i64>(5)?,
                "variable_expense_count": row.get::<_, i64>(6)?,
            }))
        })
        .map_err(storage_err("failed to query categories"))?;
    let mut rows = Vec::new();
    for row in iter {
        rows.push(row.map_err(storage_err("failed to read category"))?);
    }

    Ok(json!({
        "summary": { "count": rows.len() },
        "rows": rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{count_rows, created_id, migrated_temp_db, seed_user, v_i64, v_str};

    fn category(name: &str) -> CategoryRequest {
        CategoryRequest {
            name: Some(name.to_string()),
            icon: Some("home".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn deleting_a_category_cascades_its_expenses() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        let created = create_category_at_db_path(&db_path, &session, category("Housing")).unwrap();
        let id = created_id(&created);

        let conn = open_ledger_connection(&db_path).unwrap();
        conn.execute(
            "INSERT INTO fixed_expenses(id, user_id, description, category_id, amount_cents, created_at, updated_at)
             VALUES ('f1', 'user_a', 'Rent', ?1, 100000, '2024-03-01 10:00:00', '2024-03-01 10:00:00')",
            [&id],
        )
        .unwrap();

        let deleted = delete_category_at_db_path(
            &db_path,
            &session,
            RecordDeleteRequest { id: Some(id.clone()) },
        )
        .unwrap();
        assert_eq!(v_i64(&deleted, &["affected_rows"]), 1);
        assert_eq!(v_i64(&deleted, &["cascaded", "fixed_expenses"]), 1);
        assert_eq!(count_rows(&db_path, "fixed_expenses"), 0);
        assert_eq!(count_rows(&db_path, "categories"), 0);
    }

    #[test]
    fn foreign_delete_and_update_touch_nothing() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        seed_user(&db_path, "user_b");
        let created =
            create_category_at_db_path(&db_path, &Session::authenticated("user_a"), category("Food"))
                .unwrap();
        let id = created_id(&created);
        let intruder = Session::authenticated("user_b");

        let deleted =
            delete_category_at_db_path(&db_path, &intruder, RecordDeleteRequest { id: Some(id.clone()) })
                .unwrap();
        assert_eq!(v_i64(&deleted, &["affected_rows"]), 0);
        assert_eq!(v_i64(&deleted, &["cascaded", "fixed_expenses"]), 0);

        let mut rename = category("Mine now");
        rename.id = Some(id);
        let updated = update_category_at_db_path(&db_path, &intruder, rename).unwrap();
        assert_eq!(v_i64(&updated, &["affected_rows"]), 0);
        assert_eq!(count_rows(&db_path, "categories"), 1);
    }

    #[test]
    fn list_is_sorted_and_counts_expenses() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let session = Session::authenticated("user_a");
        create_category_at_db_path(&db_path, &session, category("Transport")).unwrap();
        create_category_at_db_path(&db_path, &session, category("Food")).unwrap();

        let listed = list_categories_at_db_path(&db_path, &session).unwrap();
        assert_eq!(v_i64(&listed, &["summary", "count"]), 2);
        assert_eq!(v_str(&listed, &["rows", "0", "name"]), "Food");
        assert_eq!(v_i64(&listed, &["rows", "0", "fixed_expense_count"]), 0);

        let empty = list_categories_at_db_path(&db_path, &Session::Anonymous).unwrap();
        assert_eq!(v_i64(&empty, &["summary", "count"]), 0);
    }

    #[test]
    fn delete_requires_an_id() {
        let (_dir, db_path) = migrated_temp_db();
        seed_user(&db_path, "user_a");
        let err = delete_category_at_db_path(
            &db_path,
            &Session::authenticated("user_a"),
            RecordDeleteRequest::default(),
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("id"));
    }
}
