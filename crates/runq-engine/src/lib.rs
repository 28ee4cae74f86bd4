//! Run-template scheduling and job queue engine on SQLite.
//!
//! # Overview
//!
//! A run template binds one application to one company with a recurrence.
//! When a template is due (or an operator asks for a run) the scheduling
//! service writes a [`Job`] and a [`QueueEntry`] and advances the template's
//! `next_schedule`, all in one transaction. Executors take work off the queue
//! with [`queue::claim_next`] and report back through [`jobs::record_outcome`].
//!
//! # Recurrence
//!
//! | Code | Meaning                    |
//! |------|----------------------------|
//! | `n`  | one-shot, never recurs     |
//! | `i`  | every minute               |
//! | `h`  | every hour                 |
//! | `d`  | every day                  |
//! | `w`  | every week                 |
//! | `m`  | every calendar month       |
//! | `y`  | every calendar year        |
//!
//! Anything else must be a five-field cron expression.
//!
//! Every operation takes a [`Context`] carrying the store, the acting tenant
//! and the clock.

pub mod context;
pub mod cron;
pub mod db;
pub mod directory;
pub mod error;
pub mod inspector;
pub mod jobs;
pub mod queue;
pub mod recurrence;
pub mod repair;
pub mod scheduling;
pub mod templates;
pub mod time;
pub mod types;

#[cfg(test)]
mod test_support;

pub use context::{Clock, Context};
pub use db::Store;
pub use error::{EngineError, ErrorKind, Result};
pub use recurrence::{next_run, Interval, Recurrence};
pub use types::{Direction, Environment, Job, JobStatus, Page, QueueEntry, RunTemplate, ScheduleKind};
