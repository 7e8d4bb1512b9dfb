//! Migrate command
//!
//! Usage:
//!   folio-cli migrate run [--dir D] [--table T] [--strict] [--dry-run]
//!   folio-cli migrate status [--dir D] [--table T] [--json]
//!   folio-cli migrate new <SLUG> --dir D

use anyhow::Context;
use clap::{Args, Subcommand};
use folio_core::{UnitOutcome, UnitStatus};
use folio_store::migrations::scaffold_unit;
use folio_store::{
    connect, Applicator, ApplyOptions, DirectorySource, EmbeddedSource, UnitSource,
    DEFAULT_RECORD_TABLE,
};
use std::path::PathBuf;

use crate::config::load_target;

#[derive(Debug, Args)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub command: MigrateCommand,
}

#[derive(Debug, Subcommand)]
pub enum MigrateCommand {
    /// Apply every pending migration unit
    Run(RunArgs),
    /// Show applied and pending units without changing anything
    Status(StatusArgs),
    /// Create an empty, timestamped unit file
    New(NewArgs),
}

/// Where units come from and where records go
#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Directory of `.sql` units; the embedded portfolio schema when omitted
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Record-keeping table
    #[arg(long, default_value = DEFAULT_RECORD_TABLE)]
    pub table: String,

    /// Store URL (`postgres://…` or `sqlite:path`); overrides the DB_* variables
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Fail on checksum drift, unknown records or out-of-order units
    #[arg(long)]
    pub strict: bool,

    /// List pending units without applying them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct NewArgs {
    /// Lowercase name for the unit, e.g. `add_blog_posts`
    pub slug: String,

    /// Directory to create the unit in
    #[arg(long)]
    pub dir: PathBuf,
}

/// Execute migrate command
pub async fn execute(args: MigrateArgs) -> anyhow::Result<()> {
    match args.command {
        MigrateCommand::Run(run_args) => execute_run(run_args).await,
        MigrateCommand::Status(status_args) => execute_status(status_args).await,
        MigrateCommand::New(new_args) => execute_new(new_args),
    }
}

fn unit_source(dir: &Option<PathBuf>) -> Box<dyn UnitSource> {
    match dir {
        Some(dir) => Box::new(DirectorySource::new(dir)),
        None => Box::new(EmbeddedSource),
    }
}

async fn execute_run(args: RunArgs) -> anyhow::Result<()> {
    let target = load_target(args.target.database_url.as_deref())
        .context("cannot resolve the target database")?;
    let store = connect(&target, &args.target.table, !args.dry_run).await?;
    let source = unit_source(&args.target.dir);

    let mut applicator = Applicator::new(
        store,
        ApplyOptions {
            strict: args.strict,
            dry_run: args.dry_run,
        },
    );
    let summary = applicator.run(source.as_ref()).await?;

    for (name, outcome) in &summary.units {
        match outcome {
            UnitOutcome::Skipped => println!("  skip     {}", name),
            UnitOutcome::Applied if summary.dry_run => println!("  pending  {}", name),
            UnitOutcome::Applied => println!("✓ applied  {}", name),
        }
    }
    println!("{} ({} ms)", summary, summary.duration_ms);

    Ok(())
}

async fn execute_status(args: StatusArgs) -> anyhow::Result<()> {
    let target = load_target(args.target.database_url.as_deref())
        .context("cannot resolve the target database")?;
    let store = connect(&target, &args.target.table, false).await?;
    let source = unit_source(&args.target.dir);

    let mut applicator = Applicator::new(store, ApplyOptions::default());
    let report = applicator.status(source.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for unit in &report.units {
        match &unit.status {
            UnitStatus::Applied {
                applied_at,
                drifted,
            } => {
                let marker = if *drifted { "  (changed since applied)" } else { "" };
                println!(
                    "  applied  {}  {}{}",
                    unit.name,
                    applied_at.format("%Y-%m-%d %H:%M:%S"),
                    marker
                );
            }
            UnitStatus::Pending => println!("  pending  {}", unit.name),
        }
    }
    for record in &report.unknown {
        println!("  unknown  {}  (no matching unit)", record.name);
    }
    println!(
        "{} applied, {} pending",
        report.units.len() - report.pending_count(),
        report.pending_count()
    );

    Ok(())
}

fn execute_new(args: NewArgs) -> anyhow::Result<()> {
    let path = scaffold_unit(&args.dir, &args.slug, chrono::Utc::now())?;
    println!("Created {}", path.display());
    Ok(())
}
