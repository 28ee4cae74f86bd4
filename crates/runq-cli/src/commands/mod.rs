//! Subcommand implementations and the argument parsers they share.

pub mod directory;
pub mod job;
pub mod queue;
pub mod runtemplate;
pub mod scheduler;

use anyhow::bail;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use runq_engine::{Environment, Page};

/// `KEY=VALUE` as given to `--env`.
pub fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn env_map(pairs: Vec<(String, String)>) -> Environment {
    pairs.into_iter().collect()
}

/// Accepts `now`, RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (UTC).
pub fn parse_time(s: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("now") {
        return Ok(now);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(t.and_utc());
    }
    if let Some(t) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(t.and_utc());
    }
    bail!("unrecognised time '{s}' (use now, YYYY-MM-DD HH:MM:SS or RFC 3339)")
}

pub fn page(limit: Option<u32>, offset: u32) -> Page {
    Page { limit, offset }
}
