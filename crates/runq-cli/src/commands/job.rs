//! `runq job ...`

use anyhow::Result;
use clap::{Args, Subcommand};
use runq_core::{AppId, JobId, RunqConfig, TemplateId};
use runq_engine::jobs::{self, JobFilter};
use runq_engine::scheduling;
use runq_engine::{Context, Direction, Job, JobStatus};
use tabled::Tabled;

use super::{env_map, page, parse_env_pair, parse_time};
use crate::output::{self, opt, OutputFormat};

#[derive(Args, Debug)]
pub struct JobArgs {
    #[command(subcommand)]
    command: JobCommands,
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// List jobs
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        runtemplate: Option<TemplateId>,

        #[arg(long)]
        app_id: Option<AppId>,

        /// incomplete, successful or failed
        #[arg(long)]
        status: Option<JobStatus>,

        /// Sort by id: A (ascending) or D (descending)
        #[arg(long, default_value = "A")]
        order: Direction,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Show one job
    Get {
        #[arg(long)]
        id: JobId,
    },

    /// Create an ad-hoc job for a run template and queue it
    Create {
        #[arg(long)]
        runtemplate: TemplateId,

        /// now, YYYY-MM-DD HH:MM:SS (UTC) or RFC 3339
        #[arg(long, default_value = "now")]
        scheduled: String,

        /// Defaults to `[scheduler] default_executor`
        #[arg(long)]
        executor: Option<String>,

        /// Override for this job only, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },

    /// Outcome counters over all jobs
    Status,

    /// Record a job's exit code (executor hook)
    Finish {
        #[arg(long)]
        id: JobId,

        #[arg(long, allow_hyphen_values = true)]
        exitcode: i32,

        /// Defaults to now
        #[arg(long, default_value = "now")]
        ended_at: String,
    },
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Template")]
    runtemplate: String,
    #[tabled(rename = "Scheduled")]
    scheduled_at: String,
    #[tabled(rename = "Executor")]
    executor: String,
    #[tabled(rename = "Type")]
    schedule_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Exit code")]
    exitcode: String,
}

impl From<&Job> for JobRow {
    fn from(j: &Job) -> Self {
        Self {
            id: j.id.to_string(),
            runtemplate: j.runtemplate_id.to_string(),
            scheduled_at: j.scheduled_at.to_string(),
            executor: j.executor.clone(),
            schedule_type: j.schedule_type.to_string(),
            status: j.status().to_string(),
            exitcode: opt(j.exitcode),
        }
    }
}

pub fn execute(args: JobArgs, ctx: &Context, config: &RunqConfig, format: OutputFormat) -> Result<()> {
    match args.command {
        JobCommands::List {
            runtemplate,
            app_id,
            status,
            order,
            limit,
            offset,
        } => {
            let filter = JobFilter {
                runtemplate,
                app: app_id,
                status,
            };
            let list = jobs::list(ctx, &filter, order, page(limit, offset))?;
            let rows: Vec<JobRow> = list.iter().map(JobRow::from).collect();
            output::print_list(&rows, &list, "No jobs.", format)
        }

        JobCommands::Get { id } => output::print_single(&jobs::get(ctx, id)?, format),

        JobCommands::Create {
            runtemplate,
            scheduled,
            executor,
            env,
        } => {
            let at = parse_time(&scheduled, ctx.now())?;
            let executor = executor.unwrap_or_else(|| config.scheduler.default_executor.clone());
            let run = scheduling::schedule_run(ctx, runtemplate, &env_map(env), at, &executor)?;
            output::print_success(
                &format!(
                    "Job {} created for run template {runtemplate}, queued for {}",
                    run.job.id, run.queue_entry.after
                ),
                &run,
                format,
            )
        }

        JobCommands::Status => output::print_single(&jobs::status_summary(ctx)?, format),

        JobCommands::Finish {
            id,
            exitcode,
            ended_at,
        } => {
            let ended_at = parse_time(&ended_at, ctx.now())?;
            let job = jobs::record_outcome(ctx, id, exitcode, ended_at)?;
            output::print_success(
                &format!("Job {id} finished with exit code {exitcode} ({})", job.status()),
                &job,
                format,
            )
        }
    }
}
