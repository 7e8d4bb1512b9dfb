//! Folio CLI
//!
//! Command-line interface for the portfolio database

use clap::{Parser, Subcommand};
use folio_core::logging_facility::{init, Profile};

mod commands;
mod config;

#[derive(Debug, Parser)]
#[command(name = "folio-cli")]
#[command(about = "Folio - portfolio database tooling", long_about = None)]
struct Cli {
    /// Emit log events as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schema migration operations
    Migrate(commands::migrate::MigrateArgs),
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init(if cli.json_logs {
        Profile::Production
    } else {
        Profile::Development
    });

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Migrate(args) => commands::migrate::execute(args).await,
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
