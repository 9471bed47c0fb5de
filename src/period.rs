use chrono::{Datelike, Local};
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};

/// Calendar month a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub month: u32,
    pub year: i32,
}

impl Period {
    pub fn new(month: u32, year: i32) -> LedgerResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(LedgerError::validation("month", "month must be between 1 and 12"));
        }
        Ok(Period {
            month,
            year: validate_year(year)?,
        })
    }

    pub fn current() -> Self {
        let today = Local::now().date_naive();
        Period {
            month: today.month(),
            year: today.year(),
        }
    }

    /// Blank or missing parts fall back to the current local month/year.
    pub fn from_params(month: Option<&str>, year: Option<&str>) -> LedgerResult<Self> {
        let current = Period::current();
        let month = match blank_to_none(month) {
            None => current.month,
            Some(text) => text
                .parse::<u32>()
                .map_err(|_| LedgerError::validation("month", "month must be a number"))?,
        };
        let year = parse_year_or_current(year)?;
        Period::new(month, year)
    }

    /// `YYYY-MM`, the prefix compared against stored timestamps.
    pub fn month_key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

fn blank_to_none(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn validate_year(year: i32) -> LedgerResult<i32> {
    if !(1000..=9999).contains(&year) {
        return Err(LedgerError::validation("year", "year must have four digits"));
    }
    Ok(year)
}

pub fn parse_year_or_current(raw: Option<&str>) -> LedgerResult<i32> {
    match blank_to_none(raw) {
        None => Ok(Period::current().year),
        Some(text) => {
            let year = text
                .parse::<i32>()
                .map_err(|_| LedgerError::validation("year", "year must be a number"))?;
            validate_year(year)
        }
    }
}

/// Which timestamp places a row in a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodBasis {
    /// Month/year of `created_at`.
    #[default]
    CreatedAt,
    /// The row's own date column (income date, payment date, due date...).
    RecordDate,
}

impl PeriodBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodBasis::CreatedAt => "created_at",
            PeriodBasis::RecordDate => "record_date",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "created_at" => Some(PeriodBasis::CreatedAt),
            "record_date" => Some(PeriodBasis::RecordDate),
            _ => None,
        }
    }

    /// Request override, blank keeps the configured default.
    pub fn from_request(raw: Option<&str>, default: PeriodBasis) -> LedgerResult<Self> {
        match blank_to_none(raw) {
            None => Ok(default),
            Some(text) => PeriodBasis::parse(text).ok_or_else(|| {
                LedgerError::validation(
                    "period_basis",
                    "period_basis must be one of: created_at, record_date",
                )
            }),
        }
    }
}
