//! Command-line front end (`runq`) for the run-template scheduler and queue.

use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use runq_core::RunqConfig;
use runq_engine::{directory, Context, Store};
use tracing::{info, warn};

mod commands;
mod output;

use commands::{directory as directory_cmd, job, queue, runtemplate, scheduler};
use output::OutputFormat;

/// Schedule run templates, inspect and repair the job queue
#[derive(Parser, Debug)]
#[command(name = "runq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (falls back to RUNQ_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Output format; defaults to `[output] format` from the config
    #[arg(short, long, value_enum, global = true)]
    format: Option<OutputFormat>,

    /// Act on behalf of one company (id or slug)
    #[arg(long, global = true)]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run template management and scheduling
    #[command(alias = "rt")]
    Runtemplate(runtemplate::RuntemplateArgs),

    /// Job inspection and outcome reporting
    Job(job::JobArgs),

    /// Queue overview, listing and maintenance
    #[command(alias = "q")]
    Queue(queue::QueueArgs),

    /// Application registry
    App(directory_cmd::AppArgs),

    /// Company registry
    Company(directory_cmd::CompanyArgs),

    /// Run the scheduler loop
    Scheduler(scheduler::SchedulerArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runq_cli=info,runq_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > RUNQ_CONFIG env > ~/.runq/runq.toml
    let path = config_path(cli.config.clone(), std::env::var("RUNQ_CONFIG").ok());
    let config = RunqConfig::load(path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        RunqConfig::default()
    });
    let format = cli
        .format
        .unwrap_or_else(|| OutputFormat::from(config.output.format));

    match run(cli, &config, format).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&e, format);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: &RunqConfig, format: OutputFormat) -> anyhow::Result<()> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    let store = Store::open(db_path).with_context(|| format!("cannot open database {db_path}"))?;

    let mut ctx = Context::new(store);
    if let Some(tenant) = cli.tenant.as_deref() {
        let company = directory::resolve_company(&ctx, tenant)?;
        info!(company_id = %company.id, slug = %company.slug, "acting for tenant");
        ctx = ctx.with_tenant(company.id);
    }

    match cli.command {
        Commands::Runtemplate(args) => runtemplate::execute(args, &ctx, config, format),
        Commands::Job(args) => job::execute(args, &ctx, config, format),
        Commands::Queue(args) => queue::execute(args, &ctx, config, format),
        Commands::App(args) => directory_cmd::execute_app(args, &ctx, format),
        Commands::Company(args) => directory_cmd::execute_company(args, &ctx, format),
        Commands::Scheduler(args) => scheduler::execute(args, ctx, config, format).await,
    }
}

fn config_path(flag: Option<String>, env: Option<String>) -> Option<String> {
    flag.or(env).filter(|p| !p.trim().is_empty())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
