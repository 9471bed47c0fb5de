use chrono::{Datelike, Local, NaiveDate};
use rusqlite::Connection;

use crate::error::{LedgerError, LedgerResult};
use crate::money::parse_amount_to_cents;

pub const EXPENSE_STATUS_CHOICES: &[&str] = &["paid", "due", "overdue"];
pub const PAYMENT_METHOD_CHOICES: &[&str] =
    &["debit", "credit", "bank_transfer", "cash", "pix", "other"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpenseStatus {
    Paid,
    Due,
    Overdue,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Paid => "paid",
            ExpenseStatus::Due => "due",
            ExpenseStatus::Overdue => "overdue",
        }
    }

    pub fn parse(raw: Option<&str>) -> LedgerResult<Self> {
        let text = raw.unwrap_or("").trim().to_lowercase();
        match text.as_str() {
            "" | "due" => Ok(ExpenseStatus::Due),
            "paid" => Ok(ExpenseStatus::Paid),
            "overdue" => Ok(ExpenseStatus::Overdue),
            _ => Err(LedgerError::validation(
                "status",
                format!("status must be one of: {}", EXPENSE_STATUS_CHOICES.join(", ")),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Debit,
    Credit,
    BankTransfer,
    Cash,
    Pix,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Debit => "debit",
            PaymentMethod::Credit => "credit",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Pix => "pix",
            PaymentMethod::Other => "other",
        }
    }

    /// Blank means "not informed".
    pub fn parse_optional(raw: Option<&str>) -> LedgerResult<Option<Self>> {
        let text = raw.unwrap_or("").trim().to_lowercase();
        let method = match text.as_str() {
            "" => return Ok(None),
            "debit" => PaymentMethod::Debit,
            "credit" => PaymentMethod::Credit,
            "bank_transfer" => PaymentMethod::BankTransfer,
            "cash" => PaymentMethod::Cash,
            "pix" => PaymentMethod::Pix,
            "other" => PaymentMethod::Other,
            _ => {
                return Err(LedgerError::validation(
                    "payment_method",
                    format!(
                        "payment_method must be one of: {}",
                        PAYMENT_METHOD_CHOICES.join(", ")
                    ),
                ))
            }
        };
        Ok(Some(method))
    }
}

pub fn required_text(raw: Option<&str>, field: &str) -> LedgerResult<String> {
    let text = raw.unwrap_or("").trim().to_string();
    if text.is_empty() {
        return Err(LedgerError::validation(field, format!("{field} is required")));
    }
    Ok(text)
}

pub fn optional_text(raw: Option<&str>) -> Option<String> {
    let text = raw.unwrap_or("").trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

pub fn required_id(raw: Option<&str>) -> LedgerResult<String> {
    required_text(raw, "id")
}

/// Stored in canonical `YYYY-MM-DD` so `substr(col, 1, 7)` is the month key.
pub fn required_date(raw: Option<&str>, field: &str) -> LedgerResult<String> {
    let text = required_text(raw, field)?;
    let invalid =
        || LedgerError::validation(field, format!("{field} must be a date in YYYY-MM-DD format"));
    let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|_| invalid())?;
    if !(1000..=9999).contains(&date.year()) {
        return Err(invalid());
    }
    Ok(date.format("%Y-%m-%d").to_string())
}

pub fn optional_date(raw: Option<&str>, field: &str) -> LedgerResult<Option<String>> {
    match optional_text(raw) {
        None => Ok(None),
        Some(text) => required_date(Some(&text), field).map(Some),
    }
}

/// Required, non-negative amount in cents.
pub fn required_amount(raw: Option<&str>, field: &str) -> LedgerResult<i64> {
    let cents = parse_amount_to_cents(raw.unwrap_or(""), field)?;
    if cents < 0 {
        return Err(LedgerError::validation(
            field,
            format!("{field} must not be negative"),
        ));
    }
    Ok(cents)
}

/// Optional, non-negative amount; blank maps to `None`.
pub fn optional_amount(raw: Option<&str>, field: &str) -> LedgerResult<Option<i64>> {
    match optional_text(raw) {
        None => Ok(None),
        Some(text) => required_amount(Some(&text), field).map(Some),
    }
}

/// Signed amount where blank means zero (bank balances).
pub fn signed_amount_or_zero(raw: Option<&str>, field: &str) -> LedgerResult<i64> {
    match optional_text(raw) {
        None => Ok(0),
        Some(text) => parse_amount_to_cents(&text, field),
    }
}

/// Tables another row may point at. The caller must own the target.
#[derive(Debug, Clone, Copy)]
pub enum OwnedReference {
    BankAccount,
    Category,
}

impl OwnedReference {
    fn table(&self) -> &'static str {
        match self {
            OwnedReference::BankAccount => "bank_accounts",
            OwnedReference::Category => "categories",
        }
    }

    fn field(&self) -> &'static str {
        match self {
            OwnedReference::BankAccount => "bank_account_id",
            OwnedReference::Category => "category_id",
        }
    }
}

pub fn ensure_owned_reference(
    conn: &Connection,
    reference: OwnedReference,
    id: &str,
    user_id: &str,
) -> LedgerResult<()> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1 AND user_id = ?2)",
        reference.table()
    );
    let exists = conn
        .query_row(&sql, [id, user_id], |row| row.get::<_, i64>(0))
        .map_err(|e| LedgerError::storage(format!("failed to check {}: {e}", reference.table())))?;
    if exists == 0 {
        return Err(LedgerError::validation(
            reference.field(),
            format!("{} does not reference one of your records", reference.field()),
        ));
    }
    Ok(())
}

/// Timestamp written into `created_at` / `updated_at`.
pub fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
