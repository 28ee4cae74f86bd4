//! `runq app ...` and `runq company ...`.
//!
//! Applications and companies are normally provisioned elsewhere; these
//! commands exist to seed and look up the rows run templates point at.

use anyhow::Result;
use clap::{Args, Subcommand};
use runq_core::AppId;
use runq_engine::{directory, Context};
use uuid::Uuid;

use crate::output::{self, OutputFormat};

#[derive(Args, Debug)]
pub struct AppArgs {
    #[command(subcommand)]
    command: AppCommands,
}

#[derive(Subcommand, Debug)]
enum AppCommands {
    /// Register an application
    Register {
        #[arg(long)]
        name: String,

        /// Generated when omitted
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Show an application by id or UUID
    Get {
        #[arg(long, required_unless_present = "uuid", conflicts_with = "uuid")]
        id: Option<AppId>,

        #[arg(long)]
        uuid: Option<Uuid>,
    },
}

#[derive(Args, Debug)]
pub struct CompanyArgs {
    #[command(subcommand)]
    command: CompanyCommands,
}

#[derive(Subcommand, Debug)]
enum CompanyCommands {
    /// Register a company
    Register {
        #[arg(long)]
        name: String,

        #[arg(long)]
        slug: String,
    },

    /// Show a company by id or slug
    Get {
        id_or_slug: String,
    },
}

pub fn execute_app(args: AppArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    match args.command {
        AppCommands::Register { name, uuid } => {
            let app = directory::register_application(ctx, &name, uuid)?;
            output::print_success(
                &format!("Application {} registered with UUID {}", app.id, app.uuid),
                &app,
                format,
            )
        }
        AppCommands::Get { id, uuid } => {
            let app = match (id, uuid) {
                (Some(id), _) => directory::get_application(ctx, id)?,
                (None, Some(uuid)) => directory::application_by_uuid(ctx, uuid)?,
                (None, None) => anyhow::bail!("either --id or --uuid is required"),
            };
            output::print_single(&app, format)
        }
    }
}

pub fn execute_company(args: CompanyArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    match args.command {
        CompanyCommands::Register { name, slug } => {
            let company = directory::register_company(ctx, &name, &slug)?;
            output::print_success(
                &format!("Company {} registered as '{}'", company.id, company.slug),
                &company,
                format,
            )
        }
        CompanyCommands::Get { id_or_slug } => {
            output::print_single(&directory::resolve_company(ctx, &id_or_slug)?, format)
        }
    }
}
