//! Shared configuration, errors and identifiers for runq.

pub mod config;
pub mod error;
pub mod types;

pub use config::RunqConfig;
pub use error::{CoreError, Result};
pub use types::{AppId, CompanyId, JobId, QueueEntryId, TemplateId};
