use runq_core::{JobId, TemplateId};
use thiserror::Error;

/// Errors that can occur within the scheduling and queue engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Environment maps are persisted as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The recurrence is a malformed cron expression.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// The recurrence is neither a known interval code nor a cron expression.
    #[error("Invalid interval code: {0}")]
    InvalidInterval(String),

    /// Missing or malformed caller input.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Run template not found: {0}")]
    TemplateNotFound(String),

    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Company not found: {0}")]
    CompanyNotFound(String),

    /// Scheduling was requested for a template that may not produce runs.
    #[error("Run template {id} is not schedulable: {reason}")]
    NotSchedulable { id: TemplateId, reason: String },

    /// At most one pending queue entry may exist per template.
    #[error("Run template {id} already has a pending queue entry")]
    AlreadyQueued { id: TemplateId },

    /// `next_schedule` already moved past the requested run, usually because
    /// another scheduler took it.
    #[error("Run template {id} was rescheduled concurrently")]
    Conflict { id: TemplateId },

    /// Exit codes are written once.
    #[error("Job {id} already has an exit code")]
    AlreadyCompleted { id: JobId },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Caller-facing classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Store,
}

impl EngineError {
    /// Short error code string used in machine-readable CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::InvalidCron { .. } => "INVALID_CRON",
            EngineError::InvalidInterval(_) => "INVALID_INTERVAL",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            EngineError::JobNotFound { .. } => "JOB_NOT_FOUND",
            EngineError::ApplicationNotFound(_) => "APPLICATION_NOT_FOUND",
            EngineError::CompanyNotFound(_) => "COMPANY_NOT_FOUND",
            EngineError::NotSchedulable { .. } => "NOT_SCHEDULABLE",
            EngineError::AlreadyQueued { .. } => "ALREADY_QUEUED",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::AlreadyCompleted { .. } => "ALREADY_COMPLETED",
            EngineError::LockPoisoned => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidCron { .. }
            | EngineError::InvalidInterval(_)
            | EngineError::Validation(_)
            | EngineError::NotSchedulable { .. } => ErrorKind::Validation,
            EngineError::TemplateNotFound(_)
            | EngineError::JobNotFound { .. }
            | EngineError::ApplicationNotFound(_)
            | EngineError::CompanyNotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyQueued { .. }
            | EngineError::Conflict { .. }
            | EngineError::AlreadyCompleted { .. } => ErrorKind::Conflict,
            EngineError::Database(_) | EngineError::Serialization(_) | EngineError::LockPoisoned => {
                ErrorKind::Store
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
