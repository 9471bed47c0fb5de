use serde_json::{json, Value};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Rejection reasons surfaced by every ledger operation.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("user is not authenticated")]
    Unauthenticated,

    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Storage(String),

    #[error("{0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage(message.into())
    }

    pub fn category(&self) -> &'static str {
        match self {
            LedgerError::Unauthenticated => "UNAUTHENTICATED",
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::Storage(_) => "STORAGE_ERROR",
            LedgerError::Config(_) => "CONFIG_ERROR",
            LedgerError::Io(_) => "IO_ERROR",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            LedgerError::Validation { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }

    pub fn to_body(&self) -> Value {
        let message = match self {
            LedgerError::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        };
        json!({
            "status": "error",
            "error": {
                "category": self.category(),
                "field": self.field(),
                "message": message,
            }
        })
    }
}
