//! Error type and column-mapping helpers for the database layer.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Invalid {field} on {table} row {id}")]
    InvalidField {
        table: &'static str,
        id: String,
        field: &'static str,
    },
}

/// Parse a stored `YYYY-MM-DD` column. An unparseable value becomes `None`:
/// a bad optional CRM date degrades to "missing", it never aborts a fetch.
pub(crate) fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// Parse a stored RFC 3339 timestamp column, same degradation rule.
pub(crate) fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
