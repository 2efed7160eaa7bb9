//! futd - fast up-to-date check from the command line
//!
//! Loads a project snapshot (one change bundle per configuration), checks it
//! against the files on disk and keeps check history next to the snapshot so
//! that consecutive invocations behave like consecutive builds.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands, Settings};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "futd=info,convenient_futd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from(&cli);

    let up_to_date = match &cli.command {
        Commands::Check {
            snapshot,
            ignore_kinds,
            configuration,
        } => {
            commands::check::run_check(&settings, snapshot, ignore_kinds.as_deref(), configuration)
                .await?
        }
        Commands::Validate {
            snapshot,
            configuration,
        } => commands::check::run_validate(&settings, snapshot, configuration).await?,
        Commands::Inspect {
            snapshot,
            configuration,
        } => {
            commands::inspect::run_inspect(&settings, snapshot, configuration).await?;
            true
        }
    };

    Ok(if up_to_date {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
