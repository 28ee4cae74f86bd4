//! Five-field cron expressions.
//!
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (0-7, 0 and 7 = Sunday)
//! * * * * *
//! ```
//!
//! Fields accept `*`, single values, ranges `a-b`, lists `a,b` and steps
//! `*/n`, `a-b/n`, `a/n`. Names (`MON`, `JAN`) are not supported.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};

use crate::error::{EngineError, Result};

/// How far ahead `next_after` searches before giving up (e.g. `0 0 31 2 *`).
const SEARCH_HORIZON_YEARS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u32>,
    /// `false` when the field starts with `*`; drives the dom/dow OR rule.
    restricted: bool,
}

impl CronField {
    fn parse(expr: &str, min: u32, max: u32) -> std::result::Result<Self, String> {
        let mut values = BTreeSet::new();
        for part in expr.split(',') {
            parse_part(part, min, max, &mut values)?;
        }
        Ok(Self {
            values,
            restricted: !expr.starts_with('*'),
        })
    }

    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

fn parse_part(
    part: &str,
    min: u32,
    max: u32,
    out: &mut BTreeSet<u32>,
) -> std::result::Result<(), String> {
    if part.is_empty() {
        return Err("empty list element".to_string());
    }

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid step '{step}'"))?;
            if step == 0 {
                return Err("step must be greater than zero".to_string());
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        let a = parse_value(a)?;
        let b = parse_value(b)?;
        if a > b {
            return Err(format!("invalid range {a}-{b}"));
        }
        (a, b)
    } else {
        let v = parse_value(range)?;
        // `5/15` means "from 5 to the end of the range, every 15".
        if step.is_some() {
            (v, max)
        } else {
            (v, v)
        }
    };

    if start < min || end > max {
        return Err(format!("value out of range [{min}, {max}] in '{part}'"));
    }

    let step = step.unwrap_or(1) as usize;
    out.extend((start..=end).step_by(step));
    Ok(())
}

fn parse_value(s: &str) -> std::result::Result<u32, String> {
    s.parse().map_err(|_| format!("invalid value '{s}'"))
}

/// Check the coarse shape of an expression: exactly five whitespace
/// separated fields, each made only of digits and `* , / -`.
pub fn validate_syntax(expr: &str) -> Result<()> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(expr, format!("expected 5 fields, got {}", fields.len())));
    }
    for field in &fields {
        let ok = field
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | ',' | '/' | '-'));
        if !ok {
            return Err(invalid(expr, format!("unsupported characters in field '{field}'")));
        }
    }
    Ok(())
}

fn invalid(expr: &str, reason: String) -> EngineError {
    EngineError::InvalidCron {
        expression: expr.to_string(),
        reason,
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        validate_syntax(expr)?;
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let field = |idx: usize, min: u32, max: u32| {
            CronField::parse(fields[idx], min, max).map_err(|reason| invalid(expr, reason))
        };

        let mut day_of_week = field(4, 0, 7)?;
        // 7 is an alias for Sunday.
        if day_of_week.values.remove(&7) {
            day_of_week.values.insert(0);
        }

        Ok(Self {
            // Normalised spacing so the stored form is canonical.
            source: fields.join(" "),
            minute: field(0, 0, 59)?,
            hour: field(1, 0, 23)?,
            day_of_month: field(2, 1, 31)?,
            month: field(3, 1, 12)?,
            day_of_week,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, t: &DateTime<Utc>) -> bool {
        self.month.matches(t.month())
            && self.day_matches(t)
            && self.hour.matches(t.hour())
            && self.minute.matches(t.minute())
    }

    /// Standard cron rule: when both day fields are restricted, either may match.
    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.day_of_month.matches(t.day());
        let dow = self
            .day_of_week
            .matches(t.weekday().num_days_from_sunday());
        match (self.day_of_month.restricted, self.day_of_week.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First whole minute strictly after `from` that matches the expression.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = from.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = from.year() + SEARCH_HORIZON_YEARS;

        while t.year() <= horizon {
            if !self.month.matches(t.month()) {
                t = start_of_next_month(t)?;
            } else if !self.day_matches(&t) {
                t = start_of_day(t.date_naive().succ_opt()?)?;
            } else if !self.hour.matches(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
            } else if !self.minute.matches(t.minute()) {
                t += Duration::minutes(1);
            } else {
                return Some(t);
            }
        }
        None
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    start_of_day(NaiveDate::from_ymd_opt(year, month, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = CronExpr::parse("* * * *").unwrap_err();
        assert!(matches!(err, EngineError::InvalidCron { .. }));
        assert!(err.to_string().contains("expected 5 fields, got 4"));
        assert!(CronExpr::parse("* * * * * *").is_err());
        assert!(CronExpr::parse("").is_err());
    }

    #[test]
    fn rejects_letters() {
        assert!(validate_syntax("* * * * q").is_err());
        assert!(CronExpr::parse("0 0 * * MON").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(validate_syntax("99 * * * *").is_ok());
        assert!(CronExpr::parse("99 * * * *").is_err());
        assert!(CronExpr::parse("* 24 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("5-1 * * * *").is_err());
        assert!(CronExpr::parse("1,,2 * * * *").is_err());
    }

    #[test]
    fn accepts_ranges_lists_and_steps() {
        let expr = CronExpr::parse("*/15 8-18 1,15 * 1-5").unwrap();
        assert_eq!(expr.as_str(), "*/15 8-18 1,15 * 1-5");
        assert!(CronExpr::parse("5/10 * * * 7").is_ok());
    }

    #[test]
    fn spacing_is_normalised() {
        let expr = CronExpr::parse("  0   3 * *  * ").unwrap();
        assert_eq!(expr.to_string(), "0 3 * * *");
    }

    #[test]
    fn next_is_strictly_after() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let from = at(2024, 1, 1, 10, 30);
        assert_eq!(expr.next_after(from), Some(at(2024, 1, 1, 10, 31)));
        let mid_minute = from + Duration::seconds(20);
        assert_eq!(expr.next_after(mid_minute), Some(at(2024, 1, 1, 10, 31)));
    }

    #[test]
    fn daily_at_three() {
        let expr = CronExpr::parse("0 3 * * *").unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 2, 0)), Some(at(2024, 1, 1, 3, 0)));
        assert_eq!(expr.next_after(at(2024, 1, 1, 3, 0)), Some(at(2024, 1, 2, 3, 0)));
    }

    #[test]
    fn month_rollover_and_year_wrap() {
        let expr = CronExpr::parse("0 0 1 * *").unwrap();
        assert_eq!(expr.next_after(at(2024, 12, 15, 0, 0)), Some(at(2025, 1, 1, 0, 0)));
    }

    #[test]
    fn day_of_week_only() {
        // 2024-01-01 is a Monday; next Sunday is the 7th.
        let expr = CronExpr::parse("30 6 * * 0").unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0)), Some(at(2024, 1, 7, 6, 30)));
        let seven = CronExpr::parse("30 6 * * 7").unwrap();
        assert_eq!(seven.next_after(at(2024, 1, 1, 0, 0)), Some(at(2024, 1, 7, 6, 30)));
    }

    #[test]
    fn restricted_dom_and_dow_match_either() {
        // The 15th or any Friday; 2024-01-05 is a Friday.
        let expr = CronExpr::parse("0 0 15 * 5").unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0)), Some(at(2024, 1, 5, 0, 0)));
    }

    #[test]
    fn leap_day() {
        let expr = CronExpr::parse("0 12 29 2 *").unwrap();
        assert_eq!(expr.next_after(at(2024, 3, 1, 0, 0)), Some(at(2028, 2, 29, 12, 0)));
    }

    #[test]
    fn impossible_date_gives_none() {
        let expr = CronExpr::parse("0 0 31 2 *").unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0)), None);
    }
}
