use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};

use crate::cron::CronExpr;
use crate::error::{EngineError, Result};

/// Symbolic recurrence step, ordered from "never" to the longest step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Interval {
    None,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Interval {
    /// Every supported interval, in ascending step order.
    pub const ALL: [Interval; 7] = [
        Interval::None,
        Interval::Minutely,
        Interval::Hourly,
        Interval::Daily,
        Interval::Weekly,
        Interval::Monthly,
        Interval::Yearly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Interval::None => "none",
            Interval::Minutely => "minutely",
            Interval::Hourly => "hourly",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::Yearly => "yearly",
        }
    }

    /// Add one step to `from`. `None` for the one-shot interval.
    ///
    /// Month arithmetic clamps to the end of shorter months
    /// (Jan 31 + 1 month = Feb 29 in a leap year).
    pub fn step_from(self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Interval::None => None,
            Interval::Minutely => Some(from + Duration::minutes(1)),
            Interval::Hourly => Some(from + Duration::hours(1)),
            Interval::Daily => Some(from + Duration::days(1)),
            Interval::Weekly => Some(from + Duration::weeks(1)),
            Interval::Monthly => from.checked_add_months(Months::new(1)),
            Interval::Yearly => from.checked_add_months(Months::new(12)),
        }
    }
}

/// Map a stored interval code (`n i h d w m y`) or its long name to an
/// [`Interval`].
pub fn code_to_interval(code: &str) -> Result<Interval> {
    let code = code.trim();
    Interval::ALL
        .into_iter()
        .find(|i| code.eq_ignore_ascii_case(i.name()) || code == interval_to_code(*i).to_string())
        .ok_or_else(|| EngineError::InvalidInterval(code.to_string()))
}

pub fn interval_to_code(interval: Interval) -> char {
    match interval {
        Interval::None => 'n',
        Interval::Minutely => 'i',
        Interval::Hourly => 'h',
        Interval::Daily => 'd',
        Interval::Weekly => 'w',
        Interval::Monthly => 'm',
        Interval::Yearly => 'y',
    }
}

/// When a run template becomes due again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Interval(Interval),
    Cron(CronExpr),
}

impl Default for Recurrence {
    fn default() -> Self {
        Recurrence::Interval(Interval::None)
    }
}

impl Recurrence {
    /// Parse a stored or user-supplied recurrence.
    ///
    /// A single token is an interval code or name; anything with whitespace
    /// must be a valid five-field cron expression. Empty input means one-shot.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Recurrence::default());
        }
        if input.split_whitespace().count() == 1 {
            return code_to_interval(input).map(Recurrence::Interval);
        }
        CronExpr::parse(input).map(Recurrence::Cron)
    }

    /// Canonical stored form: the interval code or the cron expression.
    pub fn as_stored(&self) -> String {
        match self {
            Recurrence::Interval(i) => interval_to_code(*i).to_string(),
            Recurrence::Cron(expr) => expr.as_str().to_string(),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Recurrence::Interval(Interval::None))
    }

    /// Next eligible run strictly after `from`, ignoring the active flag.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Interval(i) => i.step_from(from),
            Recurrence::Cron(expr) => expr.next_after(from),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Interval(i) => write!(f, "{}", i.name()),
            Recurrence::Cron(expr) => write!(f, "cron({expr})"),
        }
    }
}

impl FromStr for Recurrence {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Recurrence::parse(s)
    }
}

impl serde::Serialize for Recurrence {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_stored())
    }
}

impl<'de> serde::Deserialize<'de> for Recurrence {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Recurrence::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Next run for a template: `None` when it is inactive or one-shot.
pub fn next_run(
    recurrence: &Recurrence,
    active: bool,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !active {
        return None;
    }
    recurrence.next_after(from)
}
