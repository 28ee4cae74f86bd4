//! Idempotent consistency pass over queue, job and template state.

use rusqlite::{Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::context::Context;
use crate::error::Result;

/// What [`fix`] changed. Empty when the store was already consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// One line per repair, in the order applied.
    pub actions: Vec<String>,
    pub orphaned_entries: usize,
    pub detached_entries: usize,
    pub inactive_templates: usize,
    pub stale_schedules: usize,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn record(&mut self, action: String) {
        warn!(action = %action, "queue repair");
        self.actions.push(action);
    }
}

/// Run every repair step in one transaction.
///
/// Installation-wide: the tenant of `ctx` is ignored.
#[instrument(skip(ctx))]
pub fn fix(ctx: &Context) -> Result<RepairReport> {
    let mut conn = ctx.store().lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut report = RepairReport::default();

    remove_orphaned_entries(&tx, &mut report)?;
    remove_detached_entries(&tx, &mut report)?;
    clear_inactive_schedules(&tx, &mut report)?;
    clear_stale_schedules(&tx, &mut report)?;

    tx.commit()?;
    info!(repairs = report.actions.len(), "queue repair finished");
    Ok(report)
}

/// Entries whose job row no longer exists.
fn remove_orphaned_entries(tx: &Transaction<'_>, report: &mut RepairReport) -> Result<()> {
    let orphans = pairs(
        tx,
        "SELECT q.id, q.job_id FROM queue q
         WHERE NOT EXISTS (SELECT 1 FROM job j WHERE j.id = q.job_id)
         ORDER BY q.id",
    )?;
    for (entry, job) in orphans {
        tx.execute("DELETE FROM queue WHERE id = ?1", [entry])?;
        report.orphaned_entries += 1;
        report.record(format!("removed queue entry {entry}: job {job} does not exist"));
    }
    Ok(())
}

/// Entries whose job belongs to a deleted template.
fn remove_detached_entries(tx: &Transaction<'_>, report: &mut RepairReport) -> Result<()> {
    let detached = pairs(
        tx,
        "SELECT q.id, j.runtemplate_id FROM queue q
         JOIN job j ON j.id = q.job_id
         WHERE NOT EXISTS (SELECT 1 FROM runtemplate rt WHERE rt.id = j.runtemplate_id)
         ORDER BY q.id",
    )?;
    for (entry, template) in detached {
        tx.execute("DELETE FROM queue WHERE id = ?1", [entry])?;
        report.detached_entries += 1;
        report.record(format!(
            "removed queue entry {entry}: run template {template} does not exist"
        ));
    }
    Ok(())
}

fn clear_inactive_schedules(tx: &Transaction<'_>, report: &mut RepairReport) -> Result<()> {
    let ids = ids(
        tx,
        "SELECT id FROM runtemplate
         WHERE active = 0 AND next_schedule IS NOT NULL
         ORDER BY id",
    )?;
    for id in ids {
        tx.execute("UPDATE runtemplate SET next_schedule = NULL WHERE id = ?1", [id])?;
        report.inactive_templates += 1;
        report.record(format!("cleared next_schedule of inactive run template {id}"));
    }
    Ok(())
}

/// Templates whose latest unqueued, unstarted, unfinished job is still the
/// run they believe is outstanding: `next_schedule` never advanced past it.
///
/// A job consumed by an executor leaves the same row shape, but scheduling
/// already moved the marker beyond `scheduled_at`, so it is left alone.
fn clear_stale_schedules(tx: &Transaction<'_>, report: &mut RepairReport) -> Result<()> {
    let stale = pairs(
        tx,
        "SELECT rt.id, j.id FROM runtemplate rt
         JOIN job j ON j.id = (SELECT MAX(id) FROM job WHERE runtemplate_id = rt.id)
         WHERE rt.next_schedule IS NOT NULL
           AND rt.next_schedule <= j.scheduled_at
           AND j.started_at IS NULL
           AND j.exitcode IS NULL
           AND NOT EXISTS (SELECT 1 FROM queue q WHERE q.job_id = j.id)
         ORDER BY rt.id",
    )?;
    for (template, job) in stale {
        tx.execute(
            "UPDATE runtemplate SET next_schedule = NULL WHERE id = ?1",
            [template],
        )?;
        report.stale_schedules += 1;
        report.record(format!(
            "cleared next_schedule of run template {template}: job {job} is not queued"
        ));
    }
    Ok(())
}

fn pairs(tx: &Transaction<'_>, sql: &str) -> Result<Vec<(i64, i64)>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn ids(tx: &Transaction<'_>, sql: &str) -> Result<Vec<i64>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::overview;
    use crate::context::Clock;
    use crate::scheduling::{schedule_run, tick};
    use crate::templates;
    use crate::test_support::{count, exec, fixture, new_template, t};
    use crate::types::Environment;

    #[test]
    fn consistent_store_needs_no_repair() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "daily", "d");
        schedule_run(&fx.ctx, tpl.id, &Environment::new(), t(2024, 1, 1, 0, 0), "native").unwrap();
        assert!(fix(&fx.ctx).unwrap().is_empty());
    }

    #[test]
    fn removes_exactly_the_orphaned_entry() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let mut jobs = Vec::new();
        for name in ["a", "b", "c"] {
            let tpl = new_template(&fx, name, "d");
            let run = schedule_run(&fx.ctx, tpl.id, &Environment::new(), t(2024, 1, 1, 0, 0), "native").unwrap();
            jobs.push(run);
        }
        exec(&fx.ctx, &format!("DELETE FROM job WHERE id = {}", jobs[1].job.id));

        let report = fix(&fx.ctx).unwrap();
        assert_eq!(report.orphaned_entries, 1);
        assert_eq!(report.actions.len(), 1);
        assert!(report.actions[0].contains(&jobs[1].queue_entry.id.to_string()));

        let left = count(&fx.ctx, "SELECT COUNT(*) FROM queue");
        assert_eq!(left, 2);
        assert_eq!(
            count(
                &fx.ctx,
                &format!(
                    "SELECT COUNT(*) FROM queue WHERE id IN ({}, {})",
                    jobs[0].queue_entry.id, jobs[2].queue_entry.id
                )
            ),
            2
        );
    }

    #[test]
    fn second_run_is_a_no_op() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "daily", "d");
        let other = new_template(&fx, "detached", "d");
        schedule_run(&fx.ctx, other.id, &Environment::new(), t(2024, 1, 1, 0, 0), "native").unwrap();
        exec(
            &fx.ctx,
            &format!(
                "INSERT INTO queue (job_id, \"after\") VALUES (500, '2024-01-01T00:00:00Z');
                 DELETE FROM runtemplate WHERE id = {other};
                 INSERT INTO job (runtemplate_id, app_id, scheduled_at, executor, schedule_type, created_at)
                 VALUES ({tpl}, 1, '2024-01-01T00:00:00Z', 'native', 'recurring', '2024-01-01T00:00:00Z');
                 UPDATE runtemplate SET next_schedule = '2024-01-01T00:00:00Z' WHERE id = {tpl};",
                other = other.id,
                tpl = tpl.id
            ),
        );

        let first = fix(&fx.ctx).unwrap();
        assert_eq!(first.orphaned_entries, 1);
        assert_eq!(first.detached_entries, 1);
        assert_eq!(first.stale_schedules, 1);
        assert_eq!(templates::get(&fx.ctx, tpl.id).unwrap().next_schedule, None);

        let second = fix(&fx.ctx).unwrap();
        assert!(second.is_empty(), "{:?}", second.actions);
        assert_eq!(overview(&fx.ctx).unwrap().total_jobs_in_queue, 0);
    }

    #[test]
    fn inactive_templates_lose_next_schedule() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "off", "d");
        exec(
            &fx.ctx,
            &format!(
                "UPDATE runtemplate SET active = 0, next_schedule = '2024-01-02T00:00:00Z' WHERE id = {}",
                tpl.id
            ),
        );
        let report = fix(&fx.ctx).unwrap();
        assert_eq!(report.inactive_templates, 1);
        assert_eq!(report.stale_schedules, 0);
        assert!(fix(&fx.ctx).unwrap().is_empty());
    }

    #[test]
    fn started_jobs_are_not_stale() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "daily", "d");
        schedule_run(&fx.ctx, tpl.id, &Environment::new(), t(2024, 1, 1, 0, 0), "native").unwrap();
        crate::queue::claim_next(&fx.ctx, "native").unwrap().unwrap();
        assert!(fix(&fx.ctx).unwrap().is_empty());
        assert!(templates::get(&fx.ctx, tpl.id).unwrap().next_schedule.is_some());
    }

    #[test]
    fn consumed_entries_are_not_stale() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "daily", "d");
        let run = schedule_run(&fx.ctx, tpl.id, &Environment::new(), t(2024, 1, 1, 0, 0), "native").unwrap();
        // executor picked the entry up without going through claim_next
        exec(&fx.ctx, &format!("DELETE FROM queue WHERE id = {}", run.queue_entry.id));

        assert!(fix(&fx.ctx).unwrap().is_empty());
        assert_eq!(
            templates::get(&fx.ctx, tpl.id).unwrap().next_schedule,
            Some(t(2024, 1, 2, 0, 0))
        );

        let later = fx.ctx.clone().with_clock(Clock::Fixed(t(2024, 1, 1, 0, 5)));
        assert!(tick(&later, "native").unwrap().scheduled.is_empty());
    }
}
