//! Read-only views over the pending queue: overview metrics and listing.
//!
//! Listing is two-phase. Ordering by a queue column (`id`, `after`, `job`)
//! is pushed into SQL together with limit/offset. Ordering by anything
//! reached through the job (template, application, company, schedule type,
//! executor) happens in memory after every row has been populated, followed
//! by paging.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use runq_core::{AppId, CompanyId, JobId, QueueEntryId, TemplateId};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::time;
use crate::types::{Direction, Page};

/// Pending queue metrics.
///
/// `jobs_this_week` and `jobs_this_month` count entries after tomorrow up to
/// and including today+7 / today+30, so they overlap each other but never
/// the overdue, today and tomorrow buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueOverview {
    pub total_jobs_in_queue: i64,
    pub orphaned_jobs: i64,
    pub unique_applications: i64,
    pub unique_companies: i64,
    pub unique_runtemplates: i64,
    pub overdue_jobs: i64,
    pub jobs_today: i64,
    pub jobs_tomorrow: i64,
    pub jobs_this_week: i64,
    pub jobs_this_month: i64,
}

#[instrument(skip(ctx))]
pub fn overview(ctx: &Context) -> Result<QueueOverview> {
    let tenant = ctx.tenant().map(CompanyId::get);
    let conn = ctx.store().lock()?;

    let mut stmt = conn.prepare(
        "SELECT q.\"after\", j.runtemplate_id, rt.app_id, rt.company_id
         FROM queue q
         JOIN job j ON j.id = q.job_id
         LEFT JOIN runtemplate rt ON rt.id = j.runtemplate_id
         WHERE ?1 IS NULL OR rt.company_id = ?1",
    )?;
    let rows = stmt.query_map([tenant], |row| {
        Ok((
            time::column(row, 0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<i64>>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;

    let today = ctx.now().date_naive();
    let buckets = Buckets::new(today);
    let mut report = QueueOverview::default();
    let mut apps = BTreeSet::new();
    let mut companies = BTreeSet::new();
    let mut templates = BTreeSet::new();

    for row in rows {
        let (after, template, app, company) = row?;
        report.total_jobs_in_queue += 1;
        templates.insert(template);
        apps.extend(app);
        companies.extend(company);
        buckets.count(after.date_naive(), &mut report);
    }
    drop(stmt);

    report.unique_applications = apps.len() as i64;
    report.unique_companies = companies.len() as i64;
    report.unique_runtemplates = templates.len() as i64;
    report.orphaned_jobs = if tenant.is_some() {
        0
    } else {
        conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE job_id NOT IN (SELECT id FROM job)",
            [],
            |row| row.get(0),
        )?
    };
    debug!(total = report.total_jobs_in_queue, orphans = report.orphaned_jobs, "queue overview");
    Ok(report)
}

struct Buckets {
    today: NaiveDate,
    tomorrow: NaiveDate,
    week_end: NaiveDate,
    month_end: NaiveDate,
}

impl Buckets {
    fn new(today: NaiveDate) -> Self {
        let plus = |n| today.checked_add_days(Days::new(n)).unwrap_or(NaiveDate::MAX);
        Self {
            today,
            tomorrow: plus(1),
            week_end: plus(7),
            month_end: plus(30),
        }
    }

    fn count(&self, day: NaiveDate, report: &mut QueueOverview) {
        if day < self.today {
            report.overdue_jobs += 1;
        } else if day == self.today {
            report.jobs_today += 1;
        } else if day == self.tomorrow {
            report.jobs_tomorrow += 1;
        } else {
            if day <= self.week_end {
                report.jobs_this_week += 1;
            }
            if day <= self.month_end {
                report.jobs_this_month += 1;
            }
        }
    }
}

/// Field a queue listing can be ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueOrder {
    #[default]
    Id,
    After,
    Job,
    RuntemplateName,
    RuntemplateId,
    AppName,
    AppId,
    CompanyName,
    CompanyId,
    ScheduleType,
    Executor,
}

impl QueueOrder {
    /// Queue table column, for fields the store can order by itself.
    fn column(self) -> Option<&'static str> {
        match self {
            QueueOrder::Id => Some("q.id"),
            QueueOrder::After => Some("q.\"after\""),
            QueueOrder::Job => Some("q.job_id"),
            _ => None,
        }
    }

    pub fn is_native(self) -> bool {
        self.column().is_some()
    }

    fn key(self, row: &QueueRow) -> SortValue {
        let int = |v: Option<i64>| v.map_or(SortValue::Missing, SortValue::Int);
        let text = |s: &str| {
            if s.is_empty() {
                SortValue::Missing
            } else {
                SortValue::Text(s.to_string())
            }
        };
        match self {
            QueueOrder::Id => SortValue::Int(row.id.get()),
            QueueOrder::After => SortValue::Text(time::to_db(row.after)),
            QueueOrder::Job => SortValue::Int(row.job_id.get()),
            QueueOrder::RuntemplateName => text(&row.runtemplate_name),
            QueueOrder::RuntemplateId => int(row.runtemplate_id.map(TemplateId::get)),
            QueueOrder::AppName => text(&row.app_name),
            QueueOrder::AppId => int(row.app_id.map(AppId::get)),
            QueueOrder::CompanyName => text(&row.company_name),
            QueueOrder::CompanyId => int(row.company_id.map(CompanyId::get)),
            QueueOrder::ScheduleType => text(&row.schedule_type),
            QueueOrder::Executor => text(&row.executor),
        }
    }
}

impl fmt::Display for QueueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueOrder::Id => "id",
            QueueOrder::After => "after",
            QueueOrder::Job => "job",
            QueueOrder::RuntemplateName => "runtemplate_name",
            QueueOrder::RuntemplateId => "runtemplate_id",
            QueueOrder::AppName => "app_name",
            QueueOrder::AppId => "app_id",
            QueueOrder::CompanyName => "company_name",
            QueueOrder::CompanyId => "company_id",
            QueueOrder::ScheduleType => "schedule_type",
            QueueOrder::Executor => "executor",
        };
        write!(f, "{s}")
    }
}

impl FromStr for QueueOrder {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "id" => QueueOrder::Id,
            "after" => QueueOrder::After,
            "job" | "job_id" => QueueOrder::Job,
            "runtemplate_name" => QueueOrder::RuntemplateName,
            "runtemplate_id" => QueueOrder::RuntemplateId,
            "app_name" => QueueOrder::AppName,
            "app_id" => QueueOrder::AppId,
            "company_name" => QueueOrder::CompanyName,
            "company_id" => QueueOrder::CompanyId,
            "schedule_type" => QueueOrder::ScheduleType,
            "executor" => QueueOrder::Executor,
            other => {
                return Err(EngineError::Validation(format!("cannot order queue by '{other}'")))
            }
        })
    }
}

/// Missing values sort before present ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Missing,
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueQuery {
    pub order: QueueOrder,
    pub direction: Direction,
    pub page: Page,
}

/// One populated queue listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueRow {
    pub id: QueueEntryId,
    pub job_id: JobId,
    pub after: DateTime<Utc>,
    /// Offset of `after` from the read-time clock.
    pub after_relative: String,
    pub schedule_type: String,
    pub executor: String,
    pub runtemplate_id: Option<TemplateId>,
    pub runtemplate_name: String,
    pub app_id: Option<AppId>,
    pub app_name: String,
    pub company_id: Option<CompanyId>,
    pub company_name: String,
}

/// Human-readable distance from `now` to `after`.
pub fn relative_offset(after: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if after < now {
        return "overdue".to_string();
    }
    let minutes = (after - now).num_minutes();
    if minutes == 0 {
        return "now".to_string();
    }
    format!("{}d {}h {}m", minutes / 1440, (minutes % 1440) / 60, minutes % 60)
}

#[instrument(skip(ctx), fields(order = %query.order))]
pub fn list(ctx: &Context, query: &QueueQuery) -> Result<Vec<QueueRow>> {
    let now = ctx.now();
    let conn = ctx.store().lock()?;

    let (order_by, window) = match query.order.column() {
        Some(column) => (
            format!("{column} {dir}, q.id {dir}", dir = query.direction.sql()),
            (query.page.sql_limit(), i64::from(query.page.offset)),
        ),
        None => ("q.id ASC".to_string(), (-1, 0)),
    };
    let sql = format!(
        "SELECT q.id, q.job_id, q.\"after\", j.schedule_type, j.executor, j.runtemplate_id
         FROM queue q
         JOIN job j ON j.id = q.job_id
         WHERE ?1 IS NULL OR j.runtemplate_id IN (SELECT id FROM runtemplate WHERE company_id = ?1)
         ORDER BY {order_by}
         LIMIT ?2 OFFSET ?3"
    );

    let mut stmt = conn.prepare(&sql)?;
    let base = stmt
        .query_map(
            rusqlite::params![ctx.tenant().map(CompanyId::get), window.0, window.1],
            |row| {
                Ok((
                    QueueEntryId(row.get(0)?),
                    JobId(row.get(1)?),
                    time::column(row, 2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    TemplateId(row.get(5)?),
                ))
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut lookup = Lookup::new(&conn);
    let mut rows = Vec::with_capacity(base.len());
    for (id, job_id, after, schedule_type, executor, template) in base {
        let mut row = QueueRow {
            id,
            job_id,
            after,
            after_relative: relative_offset(after, now),
            schedule_type,
            executor,
            runtemplate_id: None,
            runtemplate_name: String::new(),
            app_id: None,
            app_name: String::new(),
            company_id: None,
            company_name: String::new(),
        };
        lookup.populate(&mut row, template)?;
        rows.push(row);
    }

    if query.order.is_native() {
        return Ok(rows);
    }

    let mut keyed: Vec<(SortValue, QueueRow)> =
        rows.into_iter().map(|row| (query.order.key(&row), row)).collect();
    keyed.sort_by(|a, b| match query.direction {
        Direction::Asc => a.0.cmp(&b.0),
        Direction::Desc => b.0.cmp(&a.0),
    });
    let limit = query.page.limit.map_or(usize::MAX, |l| l as usize);
    let paged: Vec<QueueRow> = keyed
        .into_iter()
        .map(|(_, row)| row)
        .skip(query.page.offset as usize)
        .take(limit)
        .collect();
    debug!(rows = paged.len(), "sorted queue listing in memory");
    Ok(paged)
}

/// Per-listing memo of template, application and company display data.
struct Lookup<'c> {
    conn: &'c Connection,
    templates: HashMap<TemplateId, Option<(String, AppId, CompanyId)>>,
    apps: HashMap<AppId, Option<String>>,
    companies: HashMap<CompanyId, Option<String>>,
}

impl<'c> Lookup<'c> {
    fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            templates: HashMap::new(),
            apps: HashMap::new(),
            companies: HashMap::new(),
        }
    }

    fn populate(&mut self, row: &mut QueueRow, template: TemplateId) -> Result<()> {
        let Some((name, app, company)) = self.template(template)? else {
            return Ok(());
        };
        row.runtemplate_id = Some(template);
        row.runtemplate_name = name;
        if let Some(app_name) = self.app(app)? {
            row.app_id = Some(app);
            row.app_name = app_name;
        }
        if let Some(company_name) = self.company(company)? {
            row.company_id = Some(company);
            row.company_name = company_name;
        }
        Ok(())
    }

    fn template(&mut self, id: TemplateId) -> Result<Option<(String, AppId, CompanyId)>> {
        if let Some(hit) = self.templates.get(&id) {
            return Ok(hit.clone());
        }
        let found = self
            .conn
            .query_row(
                "SELECT name, app_id, company_id FROM runtemplate WHERE id = ?1",
                [id.get()],
                |row| Ok((row.get(0)?, AppId(row.get(1)?), CompanyId(row.get(2)?))),
            )
            .optional()?;
        self.templates.insert(id, found.clone());
        Ok(found)
    }

    fn app(&mut self, id: AppId) -> Result<Option<String>> {
        if let Some(hit) = self.apps.get(&id) {
            return Ok(hit.clone());
        }
        let found = self
            .conn
            .query_row("SELECT name FROM apps WHERE id = ?1", [id.get()], |row| row.get(0))
            .optional()?;
        self.apps.insert(id, found.clone());
        Ok(found)
    }

    fn company(&mut self, id: CompanyId) -> Result<Option<String>> {
        if let Some(hit) = self.companies.get(&id) {
            return Ok(hit.clone());
        }
        let found = self
            .conn
            .query_row("SELECT name FROM company WHERE id = ?1", [id.get()], |row| row.get(0))
            .optional()?;
        self.companies.insert(id, found.clone());
        Ok(found)
    }
}
