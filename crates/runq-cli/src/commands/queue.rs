//! `runq queue ...`; bare `runq queue` shows the overview.

use anyhow::Result;
use clap::{Args, Subcommand};
use runq_core::RunqConfig;
use runq_engine::inspector::{self, QueueOrder, QueueOverview, QueueQuery, QueueRow};
use runq_engine::{queue, repair, Context, Direction};
use tabled::Tabled;

use super::page;
use crate::output::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    command: Option<QueueCommands>,
}

#[derive(Subcommand, Debug)]
enum QueueCommands {
    /// Pending-queue metrics (default)
    Overview,

    /// List pending entries with template, application and company details
    #[command(alias = "ls")]
    List {
        /// id, after, job, runtemplate_name, runtemplate_id, app_name, app_id,
        /// company_name, company_id, schedule_type or executor
        #[arg(long, default_value = "id")]
        order_by: QueueOrder,

        /// A (ascending) or D (descending)
        #[arg(long, default_value = "A")]
        direction: Direction,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Remove every pending entry and reset all next_schedule markers
    Truncate,

    /// Repair orphaned entries and dangling schedules
    Fix,

    /// Claim the next eligible job for an executor
    Claim {
        /// Defaults to `[scheduler] default_executor`
        #[arg(long)]
        executor: Option<String>,
    },
}

#[derive(Tabled)]
struct QueueLine {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "In")]
    relative: String,
    #[tabled(rename = "Template")]
    runtemplate: String,
    #[tabled(rename = "App")]
    app: String,
    #[tabled(rename = "Company")]
    company: String,
    #[tabled(rename = "Type")]
    schedule_type: String,
    #[tabled(rename = "Executor")]
    executor: String,
}

impl From<&QueueRow> for QueueLine {
    fn from(r: &QueueRow) -> Self {
        Self {
            id: r.id.to_string(),
            job: r.job_id.to_string(),
            after: r.after.to_string(),
            relative: r.after_relative.clone(),
            runtemplate: labelled(r.runtemplate_id.map(|i| i.get()), &r.runtemplate_name),
            app: labelled(r.app_id.map(|i| i.get()), &r.app_name),
            company: labelled(r.company_id.map(|i| i.get()), &r.company_name),
            schedule_type: r.schedule_type.clone(),
            executor: r.executor.clone(),
        }
    }
}

fn labelled(id: Option<i64>, name: &str) -> String {
    match id {
        Some(id) => output::truncate_cell(&format!("{name} (#{id})")),
        None => String::new(),
    }
}

#[derive(Tabled)]
struct Metric {
    #[tabled(rename = "Metric")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: i64,
}

fn metrics(o: &QueueOverview) -> Vec<Metric> {
    let m = |name, value| Metric { name, value };
    vec![
        m("Total jobs in queue", o.total_jobs_in_queue),
        m("Orphaned entries", o.orphaned_jobs),
        m("Unique applications", o.unique_applications),
        m("Unique companies", o.unique_companies),
        m("Unique run templates", o.unique_runtemplates),
        m("Overdue (before today)", o.overdue_jobs),
        m("Today", o.jobs_today),
        m("Tomorrow", o.jobs_tomorrow),
        m("After tomorrow, within 7 days", o.jobs_this_week),
        m("After tomorrow, within 30 days", o.jobs_this_month),
    ]
}

pub fn execute(args: QueueArgs, ctx: &Context, config: &RunqConfig, format: OutputFormat) -> Result<()> {
    match args.command.unwrap_or(QueueCommands::Overview) {
        QueueCommands::Overview => {
            let overview = inspector::overview(ctx)?;
            output::print_list(&metrics(&overview), &overview, "", format)
        }

        QueueCommands::List {
            order_by,
            direction,
            limit,
            offset,
        } => {
            let query = QueueQuery {
                order: order_by,
                direction,
                page: page(limit, offset),
            };
            let rows = inspector::list(ctx, &query)?;
            let lines: Vec<QueueLine> = rows.iter().map(QueueLine::from).collect();
            output::print_list(&lines, &rows, "No jobs in queue.", format)
        }

        QueueCommands::Truncate => {
            let removed = queue::truncate(ctx)?;
            output::print_success(
                &format!("Queue truncated. Previously waiting jobs: {removed}."),
                &serde_json::json!({ "waiting": removed }),
                format,
            )
        }

        QueueCommands::Fix => {
            let report = repair::fix(ctx)?;
            if report.is_empty() {
                return output::print_success("Queue is consistent, nothing to repair.", &report, format);
            }
            let message = format!("Applied {} repairs:\n  {}", report.actions.len(), report.actions.join("\n  "));
            output::print_success(&message, &report, format)
        }

        QueueCommands::Claim { executor } => {
            let executor = executor.unwrap_or_else(|| config.scheduler.default_executor.clone());
            match queue::claim_next(ctx, &executor)? {
                Some(claimed) => output::print_single(&claimed, format),
                None => output::print_success(
                    &format!("No eligible job for executor {executor}."),
                    &serde_json::Value::Null,
                    format,
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        args: QueueArgs,
    }

    #[test]
    fn bare_queue_means_overview() {
        let h = Harness::try_parse_from(["t"]).unwrap();
        assert!(h.args.command.is_none());
    }

    #[test]
    fn derived_order_fields_parse() {
        let h = Harness::try_parse_from(["t", "list", "--order-by", "app_name", "--direction", "DESC"]).unwrap();
        let Some(QueueCommands::List { order_by, direction, .. }) = h.args.command else {
            panic!("expected list");
        };
        assert_eq!(order_by, QueueOrder::AppName);
        assert_eq!(direction, Direction::Desc);
        assert!(Harness::try_parse_from(["t", "list", "--order-by", "colour"]).is_err());
    }

    #[test]
    fn overview_table_lists_every_bucket() {
        let names: Vec<&str> = metrics(&QueueOverview::default()).iter().map(|m| m.name).collect();
        assert_eq!(names.len(), 10);
        assert!(names.contains(&"Overdue (before today)"));
    }
}
