//! Timestamp encoding for the store.
//!
//! Every timestamp is persisted as UTC text with second precision
//! (`2024-01-01T00:00:00Z`), so lexical comparison in SQL equals
//! chronological comparison.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Type;

const DB_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn to_db(t: DateTime<Utc>) -> String {
    t.format(DB_FORMAT).to_string()
}

pub fn from_db(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Drop sub-second precision so in-memory values equal their stored form.
pub fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(0)
}

pub(crate) fn column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_column(idx, &raw)
}

pub(crate) fn opt_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_column(idx, &s)).transpose()
}

fn parse_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    from_db(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })
}
