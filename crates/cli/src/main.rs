mod commands;
mod logging;

use std::process::ExitCode;
use clap::{Parser, Subcommand};
use pgmigrate::MigrationError;
use tokio_util::sync::CancellationToken;

use commands::{migrate, GlobalOptions};
use logging::{init_logging, LoggingConfig};

#[derive(Parser)]
#[command(name = "pgmigrate")]
#[command(about = "Forward-only SQL migrations for PostgreSQL")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations in one transaction
    Up,

    /// Show the recorded schema version and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create the next numbered migration file
    New {
        /// Migration name, e.g. "create users"
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig::from_flags(cli.options.quiet, cli.options.debug, cli.options.json_logs);
    if let Err(e) = init_logging(&logging) {
        eprintln!("Error: failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(target: "pgmigrate", "interrupt received; cancelling");
            on_interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Up => migrate::up(&cli.options, &cancel).await,
        Commands::Status { json } => migrate::status(&cli.options, json, &cancel).await,
        Commands::New { name } => migrate::create(&cli.options, &name).map(|_| ()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

/// 130 mirrors the shell convention for SIGINT
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MigrationError>() {
        Some(e) if e.is_cancelled() => 130,
        _ => 1,
    }
}
