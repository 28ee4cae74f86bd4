//! Scheduling service: turns a due (or operator-requested) run template into
//! a job plus a queue entry and advances the template's `next_schedule`.

use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use runq_core::{CompanyId, JobId, TemplateId};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::jobs::{self, NewJob};
use crate::queue;
use crate::recurrence::next_run;
use crate::templates::{load_template, row_to_template, COLUMNS};
use crate::time;
use crate::types::{Environment, Job, QueueEntry, RunTemplate, ScheduleKind};

/// Everything one scheduling call wrote.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledRun {
    pub job: Job,
    pub queue_entry: QueueEntry,
    /// The template's new `next_schedule`; `None` for one-shot templates.
    pub next_schedule: Option<DateTime<Utc>>,
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Templates whose missing `next_schedule` was computed this pass.
    pub seeded: Vec<TemplateId>,
    pub scheduled: Vec<JobId>,
    pub failed: usize,
}

/// Schedule a run of a due template on behalf of the scheduler daemon.
///
/// The template must still be due at `at` when the write lock is taken:
/// `next_schedule` set and not after `at`. A marker already advanced past
/// `at` means another scheduler got there first (`Conflict`); a missing one
/// has to be computed by [`tick`] before the template can run.
pub fn schedule_due_run(
    ctx: &Context,
    template: TemplateId,
    overrides: &Environment,
    at: DateTime<Utc>,
    executor: &str,
) -> Result<Job> {
    schedule(ctx, template, overrides, at, executor, ScheduleKind::Recurring).map(|run| run.job)
}

/// Operator-requested run of a template.
pub fn schedule_run(
    ctx: &Context,
    template: TemplateId,
    overrides: &Environment,
    at: DateTime<Utc>,
    executor: &str,
) -> Result<ScheduledRun> {
    schedule(ctx, template, overrides, at, executor, ScheduleKind::Adhoc)
}

/// Job insert, queue insert and `next_schedule` update in one IMMEDIATE
/// transaction. The due check runs under the same lock; any failure leaves
/// nothing behind.
#[instrument(skip(ctx, overrides), fields(template_id = %template, kind = %kind))]
fn schedule(
    ctx: &Context,
    template: TemplateId,
    overrides: &Environment,
    at: DateTime<Utc>,
    executor: &str,
    kind: ScheduleKind,
) -> Result<ScheduledRun> {
    let executor = executor.trim();
    if executor.is_empty() {
        return Err(EngineError::Validation("executor is required".to_string()));
    }
    let at = time::whole_seconds(at);
    let now = ctx.now();

    let mut conn = ctx.store().lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let tpl = load_template(&tx, template, ctx.tenant())?
        .ok_or_else(|| EngineError::TemplateNotFound(template.to_string()))?;
    if !tpl.active {
        return Err(EngineError::NotSchedulable {
            id: template,
            reason: "template is inactive".to_string(),
        });
    }
    if kind == ScheduleKind::Recurring {
        match tpl.next_schedule {
            None => {
                return Err(EngineError::NotSchedulable {
                    id: template,
                    reason: "next run has not been computed yet".to_string(),
                })
            }
            Some(next) if next > at => {
                debug!(next = %next, at = %at, "template no longer due");
                return Err(EngineError::Conflict { id: template });
            }
            Some(_) => {}
        }
    }
    if let Some(pending) = queue::pending_for_template(&tx, template)? {
        debug!(entry_id = %pending.id, "template already has a pending entry");
        return Err(EngineError::AlreadyQueued { id: template });
    }

    let mut environment = tpl.environment.clone();
    environment.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    let job = jobs::insert(
        &tx,
        NewJob {
            runtemplate_id: tpl.id,
            app_id: tpl.app_id,
            scheduled_at: at,
            executor,
            schedule_type: kind,
            environment,
        },
        now,
    )?;
    let queue_entry = queue::enqueue(&tx, job.id, at)?;

    let next_schedule = next_run(&tpl.recurrence, tpl.active, at);
    let swapped = tx.execute(
        "UPDATE runtemplate SET next_schedule = ?1, updated_at = ?2
         WHERE id = ?3 AND next_schedule IS ?4",
        rusqlite::params![
            next_schedule.map(time::to_db),
            time::to_db(now),
            template.get(),
            tpl.next_schedule.map(time::to_db),
        ],
    )?;
    if swapped != 1 {
        warn!(template_id = %template, "next_schedule changed underneath scheduler");
        return Err(EngineError::Conflict { id: template });
    }
    tx.commit()?;

    info!(
        template_id = %template,
        job_id = %job.id,
        entry_id = %queue_entry.id,
        at = %at,
        next = ?next_schedule,
        "run scheduled"
    );
    Ok(ScheduledRun {
        job,
        queue_entry,
        next_schedule,
    })
}

/// Active recurring templates that are due at the context's "now" and have
/// no pending entry. A `next_schedule` in the past is still due; a missing
/// one is not (see [`seed_next_schedules`]).
pub fn due_templates(ctx: &Context) -> Result<Vec<RunTemplate>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM runtemplate rt
         WHERE rt.active = 1
           AND rt.recurrence != 'n'
           AND rt.next_schedule IS NOT NULL
           AND rt.next_schedule <= ?1
           AND (?2 IS NULL OR rt.company_id = ?2)
           AND NOT EXISTS (
               SELECT 1 FROM queue q JOIN job j ON j.id = q.job_id
               WHERE j.runtemplate_id = rt.id
           )
         ORDER BY rt.next_schedule, rt.id"
    );
    let conn = ctx.store().lock()?;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![time::to_db(ctx.now()), ctx.tenant().map(CompanyId::get)],
        row_to_template,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Give every active recurring template without a `next_schedule` its next
/// slot after "now". Nothing is queued.
///
/// New templates, changed recurrences, truncate and repair all leave the
/// marker empty; this is where it gets recomputed.
#[instrument(skip(ctx))]
pub fn seed_next_schedules(ctx: &Context) -> Result<Vec<TemplateId>> {
    let now = ctx.now();
    let sql = format!(
        "SELECT {COLUMNS} FROM runtemplate rt
         WHERE rt.active = 1
           AND rt.recurrence != 'n'
           AND rt.next_schedule IS NULL
           AND (?1 IS NULL OR rt.company_id = ?1)
         ORDER BY rt.id"
    );

    let mut conn = ctx.store().lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let unseeded = {
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![ctx.tenant().map(CompanyId::get)],
            row_to_template,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut seeded = Vec::new();
    for tpl in unseeded {
        let Some(next) = next_run(&tpl.recurrence, tpl.active, now) else {
            continue;
        };
        let changed = tx.execute(
            "UPDATE runtemplate SET next_schedule = ?1, updated_at = ?2
             WHERE id = ?3 AND next_schedule IS NULL",
            rusqlite::params![time::to_db(next), time::to_db(now), tpl.id.get()],
        )?;
        if changed == 1 {
            debug!(template_id = %tpl.id, next = %next, "next_schedule computed");
            seeded.push(tpl.id);
        }
    }
    tx.commit()?;
    Ok(seeded)
}

/// One scheduler pass: missing markers are computed first, then every due
/// template is scheduled at "now".
///
/// A failing template is logged and skipped; the rest of the pass goes on.
#[instrument(skip(ctx), fields(executor = %executor))]
pub fn tick(ctx: &Context, executor: &str) -> Result<TickReport> {
    let now = ctx.now();
    let mut report = TickReport {
        seeded: seed_next_schedules(ctx)?,
        ..Default::default()
    };

    for tpl in due_templates(ctx)? {
        match schedule_due_run(ctx, tpl.id, &Environment::new(), now, executor) {
            Ok(job) => report.scheduled.push(job.id),
            Err(e) => {
                warn!(template_id = %tpl.id, error = %e, "failed to schedule due template");
                report.failed += 1;
            }
        }
    }

    if !report.scheduled.is_empty() || report.failed > 0 {
        info!(
            seeded = report.seeded.len(),
            scheduled = report.scheduled.len(),
            failed = report.failed,
            "scheduler tick"
        );
    }
    Ok(report)
}
