//! `runq scheduler`: the due-template scan, once or on a timer.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use runq_core::RunqConfig;
use runq_engine::scheduling::{self, TickReport};
use runq_engine::Context;
use tokio::sync::watch;
use tracing::{error, info};

use crate::output::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct SchedulerArgs {
    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Executor recorded on scheduled jobs; defaults to `[scheduler] default_executor`
    #[arg(long)]
    executor: Option<String>,

    /// Seconds between passes; defaults to `[scheduler] poll_interval_secs`
    #[arg(long)]
    interval: Option<u64>,
}

pub async fn execute(
    args: SchedulerArgs,
    ctx: Context,
    config: &RunqConfig,
    format: OutputFormat,
) -> Result<()> {
    let executor = args
        .executor
        .unwrap_or_else(|| config.scheduler.default_executor.clone());

    if args.once {
        let report = pass(ctx, executor).await?;
        return output::print_single(&report, format);
    }

    let period = Duration::from_secs(args.interval.unwrap_or(config.scheduler.poll_interval_secs).max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    run(ctx, executor, period, shutdown_rx).await;
    Ok(())
}

/// Tick every `period` until `shutdown` flips to `true`.
async fn run(ctx: Context, executor: String, period: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(executor = %executor, period_secs = period.as_secs(), "scheduler started");

    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = pass(ctx.clone(), executor.clone()).await {
                    error!("scheduler tick error: {e:#}");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }
}

/// The engine is synchronous SQLite work, so each pass runs on the blocking pool.
async fn pass(ctx: Context, executor: String) -> Result<TickReport> {
    let report = tokio::task::spawn_blocking(move || scheduling::tick(&ctx, &executor)).await??;
    Ok(report)
}
