//! Queue store: pending pointers into the job store.
//!
//! Entries are removed by an executor claiming them, by [`truncate`], or by
//! the repair pass when their job no longer exists.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use runq_core::{CompanyId, JobId, QueueEntryId, TemplateId};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::jobs::load_job;
use crate::time;
use crate::types::{Job, QueueEntry};

/// A queue entry handed to an executor by [`claim_next`].
#[derive(Debug, Clone, Serialize)]
pub struct ClaimedJob {
    pub entry_id: QueueEntryId,
    pub after: DateTime<Utc>,
    pub job: Job,
}

pub(crate) fn enqueue(conn: &Connection, job_id: JobId, after: DateTime<Utc>) -> Result<QueueEntry> {
    conn.execute(
        "INSERT INTO queue (job_id, \"after\") VALUES (?1, ?2)",
        rusqlite::params![job_id.get(), time::to_db(after)],
    )?;
    Ok(QueueEntry {
        id: QueueEntryId(conn.last_insert_rowid()),
        job_id,
        after,
    })
}

/// The pending entry belonging to any job of `template`, if one exists.
pub(crate) fn pending_for_template(conn: &Connection, template: TemplateId) -> Result<Option<QueueEntry>> {
    Ok(conn
        .query_row(
            "SELECT q.id, q.job_id, q.\"after\" FROM queue q
             JOIN job j ON j.id = q.job_id
             WHERE j.runtemplate_id = ?1
             ORDER BY q.id LIMIT 1",
            [template.get()],
            row_to_entry,
        )
        .optional()?)
}

pub(crate) fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: QueueEntryId(row.get(0)?),
        job_id: JobId(row.get(1)?),
        after: time::column(row, 2)?,
    })
}

/// Number of pending entries that reference an existing job.
pub fn length(ctx: &Context) -> Result<i64> {
    let conn = ctx.store().lock()?;
    let n = conn.query_row(
        "SELECT COUNT(*) FROM queue q
         JOIN job j ON j.id = q.job_id
         LEFT JOIN runtemplate rt ON rt.id = j.runtemplate_id
         WHERE ?1 IS NULL OR rt.company_id = ?1",
        [ctx.tenant().map(CompanyId::get)],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Remove every pending entry and reset every template's `next_schedule`.
///
/// Also resets the queue's id sequence. Installation-wide: the tenant of
/// `ctx` is ignored. Returns how many entries were pending.
#[instrument(skip(ctx))]
pub fn truncate(ctx: &Context) -> Result<usize> {
    let mut conn = ctx.store().lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let pending: i64 = tx.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
    tx.execute("DELETE FROM queue", [])?;
    tx.execute("DELETE FROM sqlite_sequence WHERE name = 'queue'", [])?;
    let reset = tx.execute(
        "UPDATE runtemplate SET next_schedule = NULL WHERE next_schedule IS NOT NULL",
        [],
    )?;
    tx.commit()?;

    info!(removed = pending, templates_reset = reset, "queue truncated");
    Ok(usize::try_from(pending).unwrap_or_default())
}

/// Atomically claim the oldest eligible entry for `executor`.
///
/// The entry is deleted and the job's `started_at` stamped in one
/// transaction, so two executors never receive the same job. Orphaned
/// entries are never handed out.
#[instrument(skip(ctx), fields(executor = %executor))]
pub fn claim_next(ctx: &Context, executor: &str) -> Result<Option<ClaimedJob>> {
    let now = ctx.now();
    let mut conn = ctx.store().lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let candidate = tx
        .query_row(
            "SELECT q.id, q.job_id, q.\"after\" FROM queue q
             JOIN job j ON j.id = q.job_id
             LEFT JOIN runtemplate rt ON rt.id = j.runtemplate_id
             WHERE q.\"after\" <= ?1
               AND j.executor = ?2 COLLATE NOCASE
               AND (?3 IS NULL OR rt.company_id = ?3)
             ORDER BY q.\"after\", q.id
             LIMIT 1",
            rusqlite::params![time::to_db(now), executor, ctx.tenant().map(CompanyId::get)],
            row_to_entry,
        )
        .optional()?;

    let Some(entry) = candidate else {
        debug!("nothing to claim");
        return Ok(None);
    };

    let removed = tx.execute("DELETE FROM queue WHERE id = ?1", [entry.id.get()])?;
    if removed != 1 {
        warn!(entry_id = %entry.id, "queue entry vanished during claim");
        return Ok(None);
    }
    tx.execute(
        "UPDATE job SET started_at = ?1 WHERE id = ?2 AND started_at IS NULL",
        rusqlite::params![time::to_db(now), entry.job_id.get()],
    )?;
    let job = load_job(&tx, entry.job_id, None)?
        .ok_or(EngineError::JobNotFound { id: entry.job_id })?;
    tx.commit()?;

    info!(entry_id = %entry.id, job_id = %job.id, "job claimed");
    Ok(Some(ClaimedJob {
        entry_id: entry.id,
        after: entry.after,
        job,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{count, exec, fixture, new_template, t};

    fn seed_job(ctx: &Context, id: i64, template: TemplateId, executor: &str, after: &str) {
        exec(
            ctx,
            &format!(
                "INSERT INTO job (id, runtemplate_id, app_id, scheduled_at, executor, schedule_type, created_at)
                 VALUES ({id}, {template}, 1, '{after}', '{executor}', 'adhoc', '{after}');
                 INSERT INTO queue (job_id, \"after\") VALUES ({id}, '{after}');"
            ),
        );
    }

    #[test]
    fn truncate_empties_queue_and_resets_sequence() {
        let fx = fixture(t(2024, 1, 1, 12, 0));
        let tpl = new_template(&fx, "t", "d");
        seed_job(&fx.ctx, 1, tpl.id, "native", "2024-01-01T10:00:00Z");
        seed_job(&fx.ctx, 2, tpl.id, "native", "2024-01-02T10:00:00Z");
        exec(
            &fx.ctx,
            "INSERT INTO queue (job_id, \"after\") VALUES (99, '2024-01-01T09:00:00Z');
             UPDATE runtemplate SET next_schedule = '2024-01-03T00:00:00Z';",
        );
        assert_eq!(crate::inspector::overview(&fx.ctx).unwrap().orphaned_jobs, 1);

        assert_eq!(truncate(&fx.ctx).unwrap(), 3);
        assert_eq!(length(&fx.ctx).unwrap(), 0);
        let after = crate::inspector::overview(&fx.ctx).unwrap();
        assert_eq!(after.total_jobs_in_queue, 0);
        assert_eq!(after.orphaned_jobs, 0);
        assert_eq!(
            count(&fx.ctx, "SELECT COUNT(*) FROM runtemplate WHERE next_schedule IS NOT NULL"),
            0
        );

        let conn = fx.ctx.store().lock().unwrap();
        let entry = enqueue(&conn, JobId(1), t(2024, 1, 5, 0, 0)).unwrap();
        assert_eq!(entry.id, QueueEntryId(1));
    }

    #[test]
    fn truncate_on_empty_queue_reports_zero() {
        let fx = fixture(t(2024, 1, 1, 12, 0));
        assert_eq!(truncate(&fx.ctx).unwrap(), 0);
    }

    #[test]
    fn claim_takes_oldest_eligible_entry_once() {
        let fx = fixture(t(2024, 1, 1, 12, 0));
        let tpl = new_template(&fx, "t", "d");
        seed_job(&fx.ctx, 1, tpl.id, "native", "2024-01-01T11:00:00Z");
        seed_job(&fx.ctx, 2, tpl.id, "native", "2024-01-01T09:00:00Z");
        seed_job(&fx.ctx, 3, tpl.id, "native", "2024-01-01T13:00:00Z");
        seed_job(&fx.ctx, 4, tpl.id, "podman", "2024-01-01T08:00:00Z");

        let first = claim_next(&fx.ctx, "native").unwrap().unwrap();
        assert_eq!(first.job.id, JobId(2));
        assert_eq!(first.job.started_at, Some(t(2024, 1, 1, 12, 0)));

        let second = claim_next(&fx.ctx, "Native").unwrap().unwrap();
        assert_eq!(second.job.id, JobId(1));

        // job 3 is not yet eligible
        assert!(claim_next(&fx.ctx, "native").unwrap().is_none());
        assert_eq!(count(&fx.ctx, "SELECT COUNT(*) FROM queue"), 2);
    }

    #[test]
    fn orphans_are_never_claimed() {
        let fx = fixture(t(2024, 1, 1, 12, 0));
        exec(&fx.ctx, "INSERT INTO queue (job_id, \"after\") VALUES (99, '2024-01-01T00:00:00Z')");
        assert!(claim_next(&fx.ctx, "native").unwrap().is_none());
        assert_eq!(length(&fx.ctx).unwrap(), 0);
        assert_eq!(count(&fx.ctx, "SELECT COUNT(*) FROM queue"), 1);
    }
}
