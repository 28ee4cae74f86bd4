use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use runq_core::{AppId, CompanyId, JobId, QueueEntryId, TemplateId};
use serde::{Deserialize, Serialize};

use crate::recurrence::Recurrence;

/// Resolved environment variables. Key order carries no meaning.
pub type Environment = BTreeMap<String, String>;

pub(crate) fn env_to_json(env: &Environment) -> serde_json::Result<String> {
    serde_json::to_string(env)
}

pub(crate) fn env_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Environment> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Whether a job was requested by an operator or produced by recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Adhoc,
    Recurring,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleKind::Adhoc => "adhoc",
            ScheduleKind::Recurring => "recurring",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adhoc" => Ok(ScheduleKind::Adhoc),
            "recurring" => Ok(ScheduleKind::Recurring),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

/// Outcome of a job as derived from its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No exit code reported yet.
    Incomplete,
    Successful,
    Failed,
}

impl JobStatus {
    pub fn from_exitcode(exitcode: Option<i32>) -> Self {
        match exitcode {
            None => JobStatus::Incomplete,
            Some(0) => JobStatus::Successful,
            Some(_) => JobStatus::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Incomplete => "incomplete",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incomplete" => Ok(JobStatus::Incomplete),
            "successful" | "success" => Ok(JobStatus::Successful),
            "failed" | "failure" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    /// Accepts `A`/`ASC` and `D`/`DESC` in any case.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" | "ASC" => Ok(Direction::Asc),
            "D" | "DESC" => Ok(Direction::Desc),
            other => Err(format!("unknown sort direction: {other}")),
        }
    }
}

/// Limit/offset window for listings. `limit: None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Page {
    /// SQLite needs a LIMIT whenever OFFSET is used; -1 means "no limit".
    pub(crate) fn sql_limit(&self) -> i64 {
        self.limit.map(i64::from).unwrap_or(-1)
    }
}

/// A reusable binding of one application to one company with a recurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTemplate {
    pub id: TemplateId,
    pub name: String,
    pub app_id: AppId,
    pub company_id: CompanyId,
    pub recurrence: Recurrence,
    pub active: bool,
    /// When the template is next due; `None` lets the next due-check decide.
    pub next_schedule: Option<DateTime<Utc>>,
    pub environment: Environment,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One concrete execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub runtemplate_id: TemplateId,
    /// Application of the template at creation time.
    pub app_id: AppId,
    pub scheduled_at: DateTime<Utc>,
    pub executor: String,
    pub schedule_type: ScheduleKind,
    /// Set once, by the executor.
    pub exitcode: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Snapshot taken at creation; never re-resolved.
    pub environment: Environment,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        JobStatus::from_exitcode(self.exitcode)
    }
}

/// A pending pointer into the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub job_id: JobId,
    /// The job may be picked up from this instant on.
    pub after: DateTime<Utc>,
}
