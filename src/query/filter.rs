//! Metering filter validation
//!
//! Turns raw query-string values into a [`UsageFilter`]. Validation runs in a
//! fixed order (system id, display name, dates, limit, offset) and stops at
//! the first failure.

use crate::clock::Clock;
use crate::schema::DailySystemCpu;
use crate::{Error, Result};

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

/// Page size used when `limit` is absent
pub const DEFAULT_LIMIT: i64 = 100;

/// Largest page size; larger requests are clamped to it
pub const MAX_LIMIT: i64 = 10_000;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Raw metering query parameters.
///
/// Everything is kept as text so that malformed numbers surface as
/// validation errors instead of extractor rejections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeteringQueryParams {
    pub system_id: Option<String>,
    pub org_id: Option<String>,
    pub display_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Validated filter over the daily usage table
#[derive(Debug, Clone, PartialEq)]
pub struct UsageFilter {
    pub system_id: Option<Uuid>,
    pub org_id: Option<String>,
    /// Raw substring; escaped only when rendered into a pattern
    pub display_name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub limit: i64,
    pub offset: i64,
}

impl UsageFilter {
    /// Validate request parameters. Missing dates default to the current
    /// month up to and including today.
    pub fn from_params(params: &MeteringQueryParams, clock: &dyn Clock) -> Result<Self> {
        let system_id = match present(&params.system_id) {
            Some(raw) => Some(parse_system_id(raw)?),
            None => None,
        };

        let display_name = present(&params.display_name).map(str::to_string);
        let org_id = present(&params.org_id).map(str::to_string);

        let start_date = match present(&params.start_date) {
            Some(raw) => parse_date("start_date", raw)?,
            None => clock.month_start(),
        };
        let end_date = match present(&params.end_date) {
            Some(raw) => parse_date("end_date", raw)?,
            None => clock.today(),
        };
        if end_date < start_date {
            return Err(Error::Validation(format!(
                "end_date {} is before start_date {}",
                end_date, start_date
            )));
        }

        let limit = match present(&params.limit) {
            Some(raw) => parse_limit(raw)?,
            None => DEFAULT_LIMIT,
        };
        let offset = match present(&params.offset) {
            Some(raw) => parse_offset(raw)?,
            None => 0,
        };

        Ok(Self {
            system_id,
            org_id,
            display_name,
            start_date,
            end_date,
            limit,
            offset,
        })
    }

    /// Case-insensitive `ILIKE` pattern for the display name filter.
    pub fn display_name_pattern(&self) -> Option<String> {
        self.display_name
            .as_deref()
            .map(|name| format!("%{}%", escape_like(name)))
    }

    /// Evaluate the filter against a row in memory. Mirrors the SQL predicate
    /// built by [`super::UsageQuery`], without pagination.
    pub fn matches(&self, row: &DailySystemCpu) -> bool {
        if row.date < self.start_date || row.date > self.end_date {
            return false;
        }
        if let Some(system_id) = self.system_id {
            if row.system_id != system_id {
                return false;
            }
        }
        if let Some(org_id) = &self.org_id {
            if &row.org_id != org_id {
                return false;
            }
        }
        if let Some(name) = &self.display_name {
            if !row
                .display_name
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Check the canonical 8-4-4-4-12 textual UUID form, in either case.
pub fn is_canonical_uuid(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    bytes.iter().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

fn parse_system_id(raw: &str) -> Result<Uuid> {
    if !is_canonical_uuid(raw) {
        return Err(Error::Validation(format!(
            "system_id '{}' is not a valid UUID",
            raw
        )));
    }
    Uuid::parse_str(raw)
        .map_err(|e| Error::Validation(format!("system_id '{}' is not a valid UUID: {}", raw, e)))
}

/// Escape `LIKE` metacharacters so user text matches literally under
/// `ESCAPE '\'`.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
    let invalid = || {
        Error::Validation(format!(
            "{} '{}' must be a date in YYYY-MM-DD format",
            field, raw
        ))
    };
    // chrono accepts unpadded fields; the API does not.
    if raw.len() != 10 {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| invalid())
}

fn is_digits(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a page size: positive integer, clamped to [`MAX_LIMIT`].
pub fn parse_limit(raw: &str) -> Result<i64> {
    if !is_digits(raw) {
        return Err(Error::Validation(format!(
            "limit must be a positive integer, got '{}'",
            raw
        )));
    }
    match raw.parse::<i64>() {
        Ok(0) => Err(Error::Validation(format!(
            "limit must be a positive integer, got {}",
            raw
        ))),
        Ok(limit) => Ok(limit.min(MAX_LIMIT)),
        // Too large for i64.
        Err(_) => Ok(MAX_LIMIT),
    }
}

/// Parse a row offset: non-negative integer.
pub fn parse_offset(raw: &str) -> Result<i64> {
    let invalid = || {
        Error::Validation(format!(
            "offset must be a non-negative integer, got '{}'",
            raw
        ))
    };
    if !is_digits(raw) {
        return Err(invalid());
    }
    raw.parse::<i64>().map_err(|_| invalid())
}
