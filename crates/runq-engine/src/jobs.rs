//! Job store: one row per execution attempt.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use runq_core::{AppId, CompanyId, JobId, TemplateId};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::time;
use crate::types::{env_column, env_to_json, Direction, Environment, Job, JobStatus, Page, ScheduleKind};

pub(crate) const COLUMNS: &str = "id, runtemplate_id, app_id, scheduled_at, executor, schedule_type,
                                  exitcode, started_at, ended_at, env_json, created_at";

/// Visibility clause for a tenant, applied to `job` rows.
const TENANT_CLAUSE: &str =
    "(?2 IS NULL OR runtemplate_id IN (SELECT id FROM runtemplate WHERE company_id = ?2))";

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub runtemplate: Option<TemplateId>,
    pub app: Option<AppId>,
    pub status: Option<JobStatus>,
}

/// Aggregate counters over the job store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStatusSummary {
    pub successful_jobs: i64,
    pub failed_jobs: i64,
    pub incomplete_jobs: i64,
    pub total_jobs: i64,
    pub queue_length: i64,
    pub total_applications: i64,
    pub recurring_jobs: i64,
}

/// Row to insert; `id` and `created_at` are assigned by the store.
pub(crate) struct NewJob<'a> {
    pub runtemplate_id: TemplateId,
    pub app_id: AppId,
    pub scheduled_at: DateTime<Utc>,
    pub executor: &'a str,
    pub schedule_type: ScheduleKind,
    pub environment: Environment,
}

pub(crate) fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let kind: String = row.get(5)?;
    let schedule_type = kind.parse::<ScheduleKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Job {
        id: JobId(row.get(0)?),
        runtemplate_id: TemplateId(row.get(1)?),
        app_id: AppId(row.get(2)?),
        scheduled_at: time::column(row, 3)?,
        executor: row.get(4)?,
        schedule_type,
        exitcode: row.get(6)?,
        started_at: time::opt_column(row, 7)?,
        ended_at: time::opt_column(row, 8)?,
        environment: env_column(row, 9)?,
        created_at: time::column(row, 10)?,
    })
}

pub(crate) fn insert(conn: &Connection, new: NewJob<'_>, now: DateTime<Utc>) -> Result<Job> {
    conn.execute(
        "INSERT INTO job
         (runtemplate_id, app_id, scheduled_at, executor, schedule_type, env_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            new.runtemplate_id.get(),
            new.app_id.get(),
            time::to_db(new.scheduled_at),
            new.executor,
            new.schedule_type.to_string(),
            env_to_json(&new.environment)?,
            time::to_db(now),
        ],
    )?;
    Ok(Job {
        id: JobId(conn.last_insert_rowid()),
        runtemplate_id: new.runtemplate_id,
        app_id: new.app_id,
        scheduled_at: new.scheduled_at,
        executor: new.executor.to_string(),
        schedule_type: new.schedule_type,
        exitcode: None,
        started_at: None,
        ended_at: None,
        environment: new.environment,
        created_at: now,
    })
}

pub(crate) fn load_job(conn: &Connection, id: JobId, tenant: Option<CompanyId>) -> Result<Option<Job>> {
    let sql = format!("SELECT {COLUMNS} FROM job WHERE id = ?1 AND {TENANT_CLAUSE}");
    Ok(conn
        .query_row(
            &sql,
            rusqlite::params![id.get(), tenant.map(CompanyId::get)],
            row_to_job,
        )
        .optional()?)
}

#[instrument(skip(ctx), fields(job_id = %id))]
pub fn get(ctx: &Context, id: JobId) -> Result<Job> {
    let conn = ctx.store().lock()?;
    load_job(&conn, id, ctx.tenant())?.ok_or(EngineError::JobNotFound { id })
}

#[instrument(skip(ctx, filter))]
pub fn list(ctx: &Context, filter: &JobFilter, direction: Direction, page: Page) -> Result<Vec<Job>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(tenant) = ctx.tenant() {
        clauses.push("runtemplate_id IN (SELECT id FROM runtemplate WHERE company_id = ?)");
        params.push(Value::Integer(tenant.get()));
    }
    if let Some(template) = filter.runtemplate {
        clauses.push("runtemplate_id = ?");
        params.push(Value::Integer(template.get()));
    }
    if let Some(app) = filter.app {
        clauses.push("app_id = ?");
        params.push(Value::Integer(app.get()));
    }
    match filter.status {
        Some(JobStatus::Incomplete) => clauses.push("exitcode IS NULL"),
        Some(JobStatus::Successful) => clauses.push("exitcode = 0"),
        Some(JobStatus::Failed) => clauses.push("exitcode IS NOT NULL AND exitcode != 0"),
        None => {}
    }

    let mut sql = format!("SELECT {COLUMNS} FROM job");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY id {} LIMIT ? OFFSET ?", direction.sql()));
    params.push(Value::Integer(page.sql_limit()));
    params.push(Value::Integer(i64::from(page.offset)));

    let conn = ctx.store().lock()?;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), row_to_job)?;
    let jobs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    debug!(count = jobs.len(), "listed jobs");
    Ok(jobs)
}

pub fn status_summary(ctx: &Context) -> Result<JobStatusSummary> {
    let tenant = ctx.tenant().map(CompanyId::get);
    let conn = ctx.store().lock()?;

    let mut summary = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN exitcode = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN exitcode != 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN exitcode IS NULL THEN 1 ELSE 0 END), 0),
                COUNT(DISTINCT app_id),
                COALESCE(SUM(CASE WHEN schedule_type = 'recurring' THEN 1 ELSE 0 END), 0)
         FROM job
         WHERE ?1 IS NULL OR runtemplate_id IN (SELECT id FROM runtemplate WHERE company_id = ?1)",
        [tenant],
        |row| {
            Ok(JobStatusSummary {
                total_jobs: row.get(0)?,
                successful_jobs: row.get(1)?,
                failed_jobs: row.get(2)?,
                incomplete_jobs: row.get(3)?,
                total_applications: row.get(4)?,
                recurring_jobs: row.get(5)?,
                queue_length: 0,
            })
        },
    )?;
    summary.queue_length = conn.query_row(
        "SELECT COUNT(*) FROM queue q
         JOIN job j ON j.id = q.job_id
         WHERE ?1 IS NULL OR j.runtemplate_id IN (SELECT id FROM runtemplate WHERE company_id = ?1)",
        [tenant],
        |row| row.get(0),
    )?;
    Ok(summary)
}

/// Record the executor's outcome. Exit codes are written once.
#[instrument(skip(ctx), fields(job_id = %id, exit_code))]
pub fn record_outcome(
    ctx: &Context,
    id: JobId,
    exit_code: i32,
    ended_at: DateTime<Utc>,
) -> Result<Job> {
    let conn = ctx.store().lock()?;
    let changed = conn.execute(
        &format!(
            "UPDATE job SET exitcode = ?3, ended_at = ?4
             WHERE id = ?1 AND exitcode IS NULL AND {TENANT_CLAUSE}"
        ),
        rusqlite::params![
            id.get(),
            ctx.tenant().map(CompanyId::get),
            exit_code,
            time::to_db(time::whole_seconds(ended_at)),
        ],
    )?;
    let job = load_job(&conn, id, ctx.tenant())?.ok_or(EngineError::JobNotFound { id })?;
    if changed == 0 {
        return Err(EngineError::AlreadyCompleted { id });
    }
    info!(job_id = %id, exit_code, status = %job.status(), "job outcome recorded");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{exec, fixture, new_template, t};

    fn seed(ctx: &Context, template: TemplateId, app: AppId, kind: ScheduleKind, exit: Option<i32>) -> Job {
        let conn = ctx.store().lock().unwrap();
        let job = insert(
            &conn,
            NewJob {
                runtemplate_id: template,
                app_id: app,
                scheduled_at: t(2024, 1, 1, 0, 0),
                executor: "native",
                schedule_type: kind,
                environment: Environment::new(),
            },
            t(2024, 1, 1, 0, 0),
        )
        .unwrap();
        if let Some(code) = exit {
            conn.execute("UPDATE job SET exitcode = ?1 WHERE id = ?2", rusqlite::params![code, job.id.get()])
                .unwrap();
        }
        job
    }

    #[test]
    fn summary_counts_outcomes_and_queue() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "t", "d");
        let ok = seed(&fx.ctx, tpl.id, fx.app.id, ScheduleKind::Recurring, Some(0));
        seed(&fx.ctx, tpl.id, fx.app.id, ScheduleKind::Recurring, Some(2));
        let pending = seed(&fx.ctx, tpl.id, AppId(77), ScheduleKind::Adhoc, None);
        exec(
            &fx.ctx,
            &format!(
                "INSERT INTO queue (job_id, \"after\") VALUES ({}, '2024-01-01T00:00:00Z');
                 INSERT INTO queue (job_id, \"after\") VALUES (9999, '2024-01-01T00:00:00Z');",
                pending.id
            ),
        );

        let summary = status_summary(&fx.ctx).unwrap();
        assert_eq!(
            summary,
            JobStatusSummary {
                successful_jobs: 1,
                failed_jobs: 1,
                incomplete_jobs: 1,
                total_jobs: 3,
                queue_length: 1,
                total_applications: 2,
                recurring_jobs: 2,
            }
        );
        assert_eq!(get(&fx.ctx, ok.id).unwrap().status(), JobStatus::Successful);
    }

    #[test]
    fn empty_store_summarises_to_zero() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        assert_eq!(status_summary(&fx.ctx).unwrap(), JobStatusSummary::default());
    }

    #[test]
    fn list_filters_by_status() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "t", "d");
        let a = seed(&fx.ctx, tpl.id, fx.app.id, ScheduleKind::Adhoc, Some(1));
        let b = seed(&fx.ctx, tpl.id, fx.app.id, ScheduleKind::Adhoc, None);

        let failed = JobFilter {
            status: Some(JobStatus::Failed),
            ..Default::default()
        };
        let rows = list(&fx.ctx, &failed, Direction::Asc, Page::default()).unwrap();
        assert_eq!(rows.iter().map(|j| j.id).collect::<Vec<_>>(), vec![a.id]);

        let all = list(&fx.ctx, &JobFilter::default(), Direction::Desc, Page::default()).unwrap();
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![b.id, a.id]);
    }

    #[test]
    fn outcome_is_recorded_once() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "t", "d");
        let job = seed(&fx.ctx, tpl.id, fx.app.id, ScheduleKind::Adhoc, None);

        let done = record_outcome(&fx.ctx, job.id, 0, t(2024, 1, 1, 0, 5)).unwrap();
        assert_eq!(done.status(), JobStatus::Successful);
        assert_eq!(done.ended_at, Some(t(2024, 1, 1, 0, 5)));

        assert!(matches!(
            record_outcome(&fx.ctx, job.id, 1, t(2024, 1, 1, 0, 6)),
            Err(EngineError::AlreadyCompleted { .. })
        ));
        assert!(matches!(
            record_outcome(&fx.ctx, JobId(4242), 0, t(2024, 1, 1, 0, 6)),
            Err(EngineError::JobNotFound { .. })
        ));
        assert_eq!(get(&fx.ctx, job.id).unwrap().exitcode, Some(0));
    }
}
