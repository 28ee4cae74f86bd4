//! `runq runtemplate ...`

use anyhow::Result;
use clap::{Args, Subcommand};
use runq_core::{AppId, RunqConfig, TemplateId};
use runq_engine::cron::CronExpr;
use runq_engine::recurrence::code_to_interval;
use runq_engine::scheduling;
use runq_engine::templates::{self, NewRunTemplate, RunTemplateFilter, RunTemplatePatch};
use runq_engine::{directory, Context, Direction, Recurrence, RunTemplate};
use tabled::Tabled;
use uuid::Uuid;

use super::{env_map, page, parse_env_pair, parse_time};
use crate::output::{self, opt, OutputFormat};

#[derive(Args, Debug)]
pub struct RuntemplateArgs {
    #[command(subcommand)]
    command: RuntemplateCommands,
}

#[derive(Subcommand, Debug)]
enum RuntemplateCommands {
    /// List run templates
    #[command(alias = "ls")]
    List {
        /// Company id or slug
        #[arg(long)]
        company: Option<String>,

        /// Application UUID
        #[arg(long)]
        app_uuid: Option<Uuid>,

        /// Only active (true) or inactive (false) templates
        #[arg(long)]
        active: Option<bool>,

        /// Sort by id: A (ascending) or D (descending)
        #[arg(long, default_value = "A")]
        order: Direction,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Show one run template
    Get {
        #[arg(long, required_unless_present = "name", conflicts_with = "name")]
        id: Option<TemplateId>,

        #[arg(long)]
        name: Option<String>,
    },

    /// Create a run template
    Create {
        #[arg(long)]
        name: String,

        #[command(flatten)]
        app: AppRef,

        /// Company id or slug
        #[arg(long)]
        company: String,

        #[command(flatten)]
        recurrence: RecurrenceArgs,

        /// Create the template switched off
        #[arg(long)]
        inactive: bool,

        /// Environment variable, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },

    /// Update a run template
    Update {
        #[arg(long)]
        id: TemplateId,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        app_id: Option<AppId>,

        /// Company id or slug
        #[arg(long)]
        company: Option<String>,

        #[command(flatten)]
        recurrence: RecurrenceArgs,

        #[arg(long)]
        active: Option<bool>,

        /// Replaces the whole environment, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },

    /// Delete a run template and its pending queue entries
    #[command(alias = "rm")]
    Delete {
        #[arg(long)]
        id: TemplateId,
    },

    /// Queue a run of a template
    Schedule {
        #[arg(long)]
        id: TemplateId,

        /// now, YYYY-MM-DD HH:MM:SS (UTC) or RFC 3339
        #[arg(long, default_value = "now")]
        at: String,

        /// Defaults to `[scheduler] default_executor`
        #[arg(long)]
        executor: Option<String>,

        /// Override for this run only, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct AppRef {
    #[arg(long)]
    app_id: Option<AppId>,

    #[arg(long)]
    app_uuid: Option<Uuid>,
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct RecurrenceArgs {
    /// Interval code (n, i, h, d, w, m, y) or name (daily, ...)
    #[arg(long)]
    interval: Option<String>,

    /// Five-field cron expression
    #[arg(long)]
    cron: Option<String>,
}

impl RecurrenceArgs {
    fn resolve(&self) -> Result<Option<Recurrence>> {
        if let Some(code) = &self.interval {
            return Ok(Some(Recurrence::Interval(code_to_interval(code)?)));
        }
        if let Some(expr) = &self.cron {
            return Ok(Some(Recurrence::Cron(CronExpr::parse(expr)?)));
        }
        Ok(None)
    }
}

#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "App")]
    app: String,
    #[tabled(rename = "Company")]
    company: String,
    #[tabled(rename = "Recurrence")]
    recurrence: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Next schedule")]
    next_schedule: String,
}

impl From<&RunTemplate> for TemplateRow {
    fn from(t: &RunTemplate) -> Self {
        Self {
            id: t.id.to_string(),
            name: output::truncate_cell(&t.name),
            app: t.app_id.to_string(),
            company: t.company_id.to_string(),
            recurrence: t.recurrence.to_string(),
            active: if t.active { "yes" } else { "no" }.to_string(),
            next_schedule: opt(t.next_schedule),
        }
    }
}

pub fn execute(
    args: RuntemplateArgs,
    ctx: &Context,
    config: &RunqConfig,
    format: OutputFormat,
) -> Result<()> {
    match args.command {
        RuntemplateCommands::List {
            company,
            app_uuid,
            active,
            order,
            limit,
            offset,
        } => {
            let company = company
                .map(|c| directory::resolve_company(ctx, &c).map(|c| c.id))
                .transpose()?;
            let filter = RunTemplateFilter {
                company,
                app_uuid,
                active,
            };
            let list = templates::list(ctx, &filter, order, page(limit, offset))?;
            let rows: Vec<TemplateRow> = list.iter().map(TemplateRow::from).collect();
            output::print_list(&rows, &list, "No run templates.", format)
        }

        RuntemplateCommands::Get { id, name } => {
            let template = match (id, name) {
                (Some(id), _) => templates::get(ctx, id)?,
                (None, Some(name)) => templates::get_by_name(ctx, &name)?,
                (None, None) => anyhow::bail!("either --id or --name is required"),
            };
            output::print_single(&template, format)
        }

        RuntemplateCommands::Create {
            name,
            app,
            company,
            recurrence,
            inactive,
            env,
        } => {
            let app_id = match (app.app_id, app.app_uuid) {
                (Some(id), _) => id,
                (None, Some(uuid)) => directory::application_by_uuid(ctx, uuid)?.id,
                (None, None) => anyhow::bail!("either --app-id or --app-uuid is required"),
            };
            let company_id = directory::resolve_company(ctx, &company)?.id;
            let new = NewRunTemplate {
                name,
                app_id,
                company_id,
                recurrence: recurrence.resolve()?.unwrap_or_default(),
                active: !inactive,
                environment: env_map(env),
            };
            let created = templates::create(ctx, new)?;
            output::print_success(
                &format!("Run template {} created", created.id),
                &created,
                format,
            )
        }

        RuntemplateCommands::Update {
            id,
            name,
            app_id,
            company,
            recurrence,
            active,
            env,
        } => {
            let company_id = company
                .map(|c| directory::resolve_company(ctx, &c).map(|c| c.id))
                .transpose()?;
            let patch = RunTemplatePatch {
                name,
                app_id,
                company_id,
                recurrence: recurrence.resolve()?,
                active,
                environment: (!env.is_empty()).then(|| env_map(env)),
            };
            let updated = templates::update(ctx, id, patch)?;
            output::print_success(&format!("Run template {id} updated"), &updated, format)
        }

        RuntemplateCommands::Delete { id } => {
            let dequeued = templates::delete(ctx, id)?;
            output::print_success(
                &format!("Run template {id} deleted ({dequeued} pending queue entries removed)"),
                &serde_json::json!({ "id": id, "dequeued": dequeued }),
                format,
            )
        }

        RuntemplateCommands::Schedule {
            id,
            at,
            executor,
            env,
        } => {
            let at = parse_time(&at, ctx.now())?;
            let executor = executor.unwrap_or_else(|| config.scheduler.default_executor.clone());
            let run = scheduling::schedule_run(ctx, id, &env_map(env), at, &executor)?;
            let next = run
                .next_schedule
                .map_or_else(|| "none".to_string(), |t| t.to_string());
            output::print_success(
                &format!(
                    "Job {} queued for {} on executor {} (next run: {next})",
                    run.job.id, run.queue_entry.after, run.job.executor
                ),
                &run,
                format,
            )
        }
    }
}
