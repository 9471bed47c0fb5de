use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{LedgerError, LedgerResult};
use crate::period::PeriodBasis;

const DEFAULT_DB_PATH: &str = "data/fincontrol.db";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub log_json: bool,
    pub period_basis: PeriodBasis,
}

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Reads `.env` (if present) and then the `FINCONTROL_*` variables.
    pub fn from_env() -> LedgerResult<Self> {
        dotenvy::dotenv().ok();

        let db_path = env_string("FINCONTROL_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let bind_raw =
            env_string("FINCONTROL_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| {
            LedgerError::Config(format!("FINCONTROL_BIND_ADDR is not a socket address ({bind_raw}): {e}"))
        })?;
        let period_basis = match env_string("FINCONTROL_PERIOD_BASIS") {
            None => PeriodBasis::default(),
            Some(raw) => PeriodBasis::parse(&raw).ok_or_else(|| {
                LedgerError::Config(format!(
                    "FINCONTROL_PERIOD_BASIS must be created_at or record_date, got {raw}"
                ))
            })?,
        };

        Ok(AppConfig {
            db_path: PathBuf::from(db_path),
            bind_addr,
            log_json: env_bool("FINCONTROL_LOG_JSON", false),
            period_basis,
        })
    }
}
