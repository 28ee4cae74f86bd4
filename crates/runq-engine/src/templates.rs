//! Run template store.

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use runq_core::{AppId, CompanyId, TemplateId};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::context::Context;
use crate::directory::{load_application, load_company};
use crate::error::{EngineError, Result};
use crate::recurrence::Recurrence;
use crate::time;
use crate::types::{env_column, env_to_json, Direction, Environment, Page, RunTemplate};

pub(crate) const COLUMNS: &str = "id, name, app_id, company_id, recurrence, active, next_schedule,
                       env_json, created_at, updated_at";

/// Input for [`create`].
#[derive(Debug, Clone)]
pub struct NewRunTemplate {
    pub name: String,
    pub app_id: AppId,
    pub company_id: CompanyId,
    pub recurrence: Recurrence,
    pub active: bool,
    pub environment: Environment,
}

impl NewRunTemplate {
    /// One-shot, active, empty environment.
    pub fn new(name: impl Into<String>, app_id: AppId, company_id: CompanyId) -> Self {
        Self {
            name: name.into(),
            app_id,
            company_id,
            recurrence: Recurrence::default(),
            active: true,
            environment: Environment::new(),
        }
    }

    pub fn recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }
}

/// Partial update for [`update`]. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct RunTemplatePatch {
    pub name: Option<String>,
    pub app_id: Option<AppId>,
    pub company_id: Option<CompanyId>,
    pub recurrence: Option<Recurrence>,
    pub active: Option<bool>,
    pub environment: Option<Environment>,
}

impl RunTemplatePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.app_id.is_none()
            && self.company_id.is_none()
            && self.recurrence.is_none()
            && self.active.is_none()
            && self.environment.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunTemplateFilter {
    pub company: Option<CompanyId>,
    pub app_uuid: Option<Uuid>,
    pub active: Option<bool>,
}

pub(crate) fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunTemplate> {
    let raw_recurrence: String = row.get(4)?;
    let recurrence = Recurrence::parse(&raw_recurrence).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(RunTemplate {
        id: TemplateId(row.get(0)?),
        name: row.get(1)?,
        app_id: AppId(row.get(2)?),
        company_id: CompanyId(row.get(3)?),
        recurrence,
        active: row.get(5)?,
        next_schedule: time::opt_column(row, 6)?,
        environment: env_column(row, 7)?,
        created_at: time::column(row, 8)?,
        updated_at: time::column(row, 9)?,
    })
}

/// Load a template visible to `tenant` (all templates when `None`).
pub(crate) fn load_template(
    conn: &Connection,
    id: TemplateId,
    tenant: Option<CompanyId>,
) -> Result<Option<RunTemplate>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM runtemplate
         WHERE id = ?1 AND (?2 IS NULL OR company_id = ?2)"
    );
    Ok(conn
        .query_row(
            &sql,
            rusqlite::params![id.get(), tenant.map(CompanyId::get)],
            row_to_template,
        )
        .optional()?)
}

fn check_references(
    conn: &Connection,
    tenant: Option<CompanyId>,
    app_id: AppId,
    company_id: CompanyId,
) -> Result<()> {
    if tenant.is_some_and(|t| t != company_id) {
        return Err(EngineError::CompanyNotFound(company_id.to_string()));
    }
    if load_application(conn, app_id)?.is_none() {
        return Err(EngineError::ApplicationNotFound(app_id.to_string()));
    }
    if load_company(conn, company_id)?.is_none() {
        return Err(EngineError::CompanyNotFound(company_id.to_string()));
    }
    Ok(())
}

fn required_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("run template name is required".to_string()));
    }
    Ok(name)
}

#[instrument(skip(ctx, new), fields(name = %new.name, app_id = %new.app_id, company_id = %new.company_id))]
pub fn create(ctx: &Context, new: NewRunTemplate) -> Result<RunTemplate> {
    let name = required_name(&new.name)?;
    let now = time::to_db(ctx.now());
    let conn = ctx.store().lock()?;
    check_references(&conn, ctx.tenant(), new.app_id, new.company_id)?;

    conn.execute(
        "INSERT INTO runtemplate
         (name, app_id, company_id, recurrence, active, next_schedule, env_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?7)",
        rusqlite::params![
            name,
            new.app_id.get(),
            new.company_id.get(),
            new.recurrence.as_stored(),
            new.active,
            env_to_json(&new.environment)?,
            now,
        ],
    )?;
    let id = TemplateId(conn.last_insert_rowid());
    info!(template_id = %id, recurrence = %new.recurrence, "run template created");

    load_template(&conn, id, None)?.ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))
}

/// Apply `patch` to template `id`.
///
/// Deactivating a template, or changing its recurrence, clears
/// `next_schedule` in the same write. Deactivation also drops the pending
/// queue entry of the template, if any, so no executor can claim it; the job
/// row stays.
#[instrument(skip(ctx, patch), fields(template_id = %id))]
pub fn update(ctx: &Context, id: TemplateId, patch: RunTemplatePatch) -> Result<RunTemplate> {
    if patch.is_empty() {
        return Err(EngineError::Validation("nothing to update".to_string()));
    }
    let now = ctx.now();
    let mut conn = ctx.store().lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut template = load_template(&tx, id, ctx.tenant())?
        .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))?;

    if let Some(name) = patch.name {
        template.name = required_name(&name)?.to_string();
    }
    if patch.app_id.is_some() || patch.company_id.is_some() {
        template.app_id = patch.app_id.unwrap_or(template.app_id);
        template.company_id = patch.company_id.unwrap_or(template.company_id);
        check_references(&tx, ctx.tenant(), template.app_id, template.company_id)?;
    }
    if let Some(recurrence) = patch.recurrence {
        if recurrence != template.recurrence {
            template.next_schedule = None;
        }
        template.recurrence = recurrence;
    }
    if let Some(active) = patch.active {
        template.active = active;
    }
    if !template.active {
        template.next_schedule = None;
    }
    if let Some(environment) = patch.environment {
        template.environment = environment;
    }
    template.updated_at = now;

    tx.execute(
        "UPDATE runtemplate
         SET name = ?1, app_id = ?2, company_id = ?3, recurrence = ?4, active = ?5,
             next_schedule = ?6, env_json = ?7, updated_at = ?8
         WHERE id = ?9",
        rusqlite::params![
            template.name,
            template.app_id.get(),
            template.company_id.get(),
            template.recurrence.as_stored(),
            template.active,
            template.next_schedule.map(time::to_db),
            env_to_json(&template.environment)?,
            time::to_db(now),
            id.get(),
        ],
    )?;
    let dequeued = if template.active {
        0
    } else {
        tx.execute(
            "DELETE FROM queue
             WHERE job_id IN (SELECT id FROM job WHERE runtemplate_id = ?1)",
            [id.get()],
        )?
    };
    tx.commit()?;

    info!(
        template_id = %id,
        active = template.active,
        dequeued,
        recurrence = %template.recurrence,
        "run template updated"
    );
    Ok(template)
}

/// Delete a template together with the pending queue entries of its jobs.
///
/// Jobs are kept for audit. Returns how many queue entries were dropped.
#[instrument(skip(ctx), fields(template_id = %id))]
pub fn delete(ctx: &Context, id: TemplateId) -> Result<usize> {
    let mut conn = ctx.store().lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if load_template(&tx, id, ctx.tenant())?.is_none() {
        return Err(EngineError::TemplateNotFound(id.to_string()));
    }
    let dequeued = tx.execute(
        "DELETE FROM queue
         WHERE job_id IN (SELECT id FROM job WHERE runtemplate_id = ?1)",
        [id.get()],
    )?;
    tx.execute("DELETE FROM runtemplate WHERE id = ?1", [id.get()])?;
    tx.commit()?;

    info!(template_id = %id, dequeued, "run template deleted");
    Ok(dequeued)
}

#[instrument(skip(ctx), fields(template_id = %id))]
pub fn get(ctx: &Context, id: TemplateId) -> Result<RunTemplate> {
    let conn = ctx.store().lock()?;
    load_template(&conn, id, ctx.tenant())?
        .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))
}

/// Look a template up by exact name. The oldest wins when names repeat.
pub fn get_by_name(ctx: &Context, name: &str) -> Result<RunTemplate> {
    let sql = format!(
        "SELECT {COLUMNS} FROM runtemplate
         WHERE name = ?1 AND (?2 IS NULL OR company_id = ?2)
         ORDER BY id LIMIT 1"
    );
    let conn = ctx.store().lock()?;
    conn.query_row(
        &sql,
        rusqlite::params![name, ctx.tenant().map(CompanyId::get)],
        row_to_template,
    )
    .optional()?
    .ok_or_else(|| EngineError::TemplateNotFound(name.to_string()))
}

#[instrument(skip(ctx, filter))]
pub fn list(
    ctx: &Context,
    filter: &RunTemplateFilter,
    direction: Direction,
    page: Page,
) -> Result<Vec<RunTemplate>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(tenant) = ctx.tenant() {
        clauses.push("company_id = ?");
        params.push(Value::Integer(tenant.get()));
    }
    if let Some(company) = filter.company {
        clauses.push("company_id = ?");
        params.push(Value::Integer(company.get()));
    }
    if let Some(uuid) = filter.app_uuid {
        clauses.push("app_id IN (SELECT id FROM apps WHERE uuid = ?)");
        params.push(Value::Text(uuid.to_string()));
    }
    if let Some(active) = filter.active {
        clauses.push("active = ?");
        params.push(Value::Integer(i64::from(active)));
    }

    let mut sql = format!("SELECT {COLUMNS} FROM runtemplate");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY id {} LIMIT ? OFFSET ?", direction.sql()));
    params.push(Value::Integer(page.sql_limit()));
    params.push(Value::Integer(i64::from(page.offset)));

    let conn = ctx.store().lock()?;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), row_to_template)?;
    let templates = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    debug!(count = templates.len(), "listed run templates");
    Ok(templates)
}

/// Replace the environment of template `id`.
pub fn set_environment(ctx: &Context, id: TemplateId, environment: Environment) -> Result<RunTemplate> {
    update(
        ctx,
        id,
        RunTemplatePatch {
            environment: Some(environment),
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Interval;
    use crate::test_support::{count, fixture, new_template, t};

    #[test]
    fn create_defaults_and_get() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let created = create(
            &fx.ctx,
            NewRunTemplate::new("Import", fx.app.id, fx.company.id),
        )
        .unwrap();
        assert!(created.active);
        assert!(created.recurrence.is_one_shot());
        assert_eq!(created.next_schedule, None);
        assert_eq!(created.created_at, t(2024, 1, 1, 0, 0));

        let fetched = get(&fx.ctx, created.id).unwrap();
        assert_eq!(fetched.name, "Import");
        assert_eq!(get_by_name(&fx.ctx, "Import").unwrap().id, created.id);
    }

    #[test]
    fn create_requires_existing_references() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let err = create(&fx.ctx, NewRunTemplate::new("x", AppId(999), fx.company.id)).unwrap_err();
        assert!(matches!(err, EngineError::ApplicationNotFound(_)));
        let err = create(&fx.ctx, NewRunTemplate::new("x", fx.app.id, CompanyId(999))).unwrap_err();
        assert!(matches!(err, EngineError::CompanyNotFound(_)));
        let err = create(&fx.ctx, NewRunTemplate::new(" ", fx.app.id, fx.company.id)).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(count(&fx.ctx, "SELECT COUNT(*) FROM runtemplate"), 0);
    }

    #[test]
    fn invalid_cron_never_reaches_the_store() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        for bad in ["* * * *", "* * * * q"] {
            assert!(Recurrence::parse(bad).is_err());
        }
        let tpl = new_template(&fx, "nightly", "30 2 * * *");
        let stored: String = fx
            .ctx
            .store()
            .lock()
            .unwrap()
            .query_row("SELECT recurrence FROM runtemplate WHERE id = ?1", [tpl.id.get()], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, "30 2 * * *");
    }

    #[test]
    fn deactivation_clears_next_schedule() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "daily", "d");
        fx.ctx
            .store()
            .lock()
            .unwrap()
            .execute(
                "UPDATE runtemplate SET next_schedule = '2024-01-02T00:00:00Z' WHERE id = ?1",
                [tpl.id.get()],
            )
            .unwrap();

        let patched = update(
            &fx.ctx,
            tpl.id,
            RunTemplatePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!patched.active);
        assert_eq!(get(&fx.ctx, tpl.id).unwrap().next_schedule, None);
    }

    #[test]
    fn deactivation_dequeues_pending_run() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "daily", "d");
        crate::scheduling::schedule_run(
            &fx.ctx,
            tpl.id,
            &Environment::new(),
            t(2024, 1, 1, 0, 0),
            "native",
        )
        .unwrap();

        update(
            &fx.ctx,
            tpl.id,
            RunTemplatePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(count(&fx.ctx, "SELECT COUNT(*) FROM queue"), 0);
        assert_eq!(count(&fx.ctx, "SELECT COUNT(*) FROM job"), 1);
        assert!(crate::queue::claim_next(&fx.ctx, "native").unwrap().is_none());
    }

    #[test]
    fn recurrence_change_clears_next_schedule_but_rename_does_not() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "daily", "d");
        let set_next = || {
            fx.ctx
                .store()
                .lock()
                .unwrap()
                .execute(
                    "UPDATE runtemplate SET next_schedule = '2024-01-02T00:00:00Z' WHERE id = ?1",
                    [tpl.id.get()],
                )
                .unwrap();
        };

        set_next();
        let renamed = update(
            &fx.ctx,
            tpl.id,
            RunTemplatePatch {
                name: Some("daily import".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(renamed.next_schedule, Some(t(2024, 1, 2, 0, 0)));

        let patched = update(
            &fx.ctx,
            tpl.id,
            RunTemplatePatch {
                recurrence: Some(Recurrence::Interval(Interval::Hourly)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(patched.next_schedule, None);
        assert_eq!(patched.recurrence, Recurrence::Interval(Interval::Hourly));
    }

    #[test]
    fn empty_patch_is_rejected() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "x", "n");
        assert!(matches!(
            update(&fx.ctx, tpl.id, RunTemplatePatch::default()),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn delete_drops_pending_entries_and_keeps_jobs() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let doomed = new_template(&fx, "doomed", "d");
        let kept = new_template(&fx, "kept", "d");
        {
            let conn = fx.ctx.store().lock().unwrap();
            for (job, tpl) in [(1, doomed.id), (2, kept.id)] {
                conn.execute(
                    "INSERT INTO job (id, runtemplate_id, app_id, scheduled_at, executor, schedule_type, created_at)
                     VALUES (?1, ?2, ?3, '2024-01-01T00:00:00Z', 'native', 'adhoc', '2024-01-01T00:00:00Z')",
                    rusqlite::params![job, tpl.get(), fx.app.id.get()],
                )
                .unwrap();
                conn.execute(
                    "INSERT INTO queue (job_id, \"after\") VALUES (?1, '2024-01-01T00:00:00Z')",
                    [job],
                )
                .unwrap();
            }
        }

        assert_eq!(delete(&fx.ctx, doomed.id).unwrap(), 1);
        assert!(matches!(get(&fx.ctx, doomed.id), Err(EngineError::TemplateNotFound(_))));
        assert_eq!(count(&fx.ctx, "SELECT COUNT(*) FROM queue"), 1);
        assert_eq!(count(&fx.ctx, "SELECT COUNT(*) FROM job"), 2);
        assert!(matches!(delete(&fx.ctx, doomed.id), Err(EngineError::TemplateNotFound(_))));
    }

    #[test]
    fn list_filters_and_orders() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let a = new_template(&fx, "a", "d");
        let b = new_template(&fx, "b", "h");
        update(
            &fx.ctx,
            b.id,
            RunTemplatePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        let all = list(&fx.ctx, &RunTemplateFilter::default(), Direction::Desc, Page::default()).unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        let active = RunTemplateFilter {
            active: Some(true),
            ..Default::default()
        };
        let only = list(&fx.ctx, &active, Direction::Asc, Page::default()).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, a.id);

        let by_app = RunTemplateFilter {
            app_uuid: Some(fx.app.uuid),
            ..Default::default()
        };
        let page = Page {
            limit: Some(1),
            offset: 1,
        };
        let second = list(&fx.ctx, &by_app, Direction::Asc, page).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, b.id);

        let nobody = RunTemplateFilter {
            app_uuid: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(list(&fx.ctx, &nobody, Direction::Asc, Page::default()).unwrap().is_empty());
    }

    #[test]
    fn other_tenants_templates_are_invisible() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let tpl = new_template(&fx, "acme job", "d");
        let other = crate::directory::register_company(&fx.ctx, "Other", "other").unwrap();
        let foreign = fx.ctx.clone().with_tenant(other.id);

        assert!(matches!(get(&foreign, tpl.id), Err(EngineError::TemplateNotFound(_))));
        assert!(list(&foreign, &RunTemplateFilter::default(), Direction::Asc, Page::default())
            .unwrap()
            .is_empty());
        let err = create(&foreign, NewRunTemplate::new("sneaky", fx.app.id, fx.company.id)).unwrap_err();
        assert!(matches!(err, EngineError::CompanyNotFound(_)));
    }

    #[test]
    fn set_environment_replaces_map() {
        let fx = fixture(t(2024, 1, 1, 0, 0));
        let mut new = NewRunTemplate::new("env", fx.app.id, fx.company.id);
        new.environment.insert("A".into(), "1".into());
        let tpl = create(&fx.ctx, new).unwrap();

        let env = Environment::from([("B".to_string(), "2".to_string())]);
        let updated = set_environment(&fx.ctx, tpl.id, env.clone()).unwrap();
        assert_eq!(updated.environment, env);
        assert_eq!(get(&fx.ctx, tpl.id).unwrap().environment, env);
    }
}
