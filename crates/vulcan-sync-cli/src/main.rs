//! vulcan-sync - upsert project configuration through a gateway tunnel

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vulcan_sync::{SyncError, EXIT_FAILURE};
use vulcan_sync_cli::{
    build_orchestrator, cancel_on_shutdown, summary_lines, Cli, ShutdownSignals,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let Some(command) = cli.command.clone() else {
        Cli::command().print_help().context("Failed to print usage")?;
        std::process::exit(EXIT_FAILURE);
    };

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(e.exit_code());
        }
    };
    let orchestrator = build_orchestrator(settings);

    let cancel = CancellationToken::new();
    let signals = ShutdownSignals::new().context("Failed to install signal handlers")?;
    cancel_on_shutdown(signals, cancel.clone());

    let report = match orchestrator
        .run(&command, cli.url.as_deref(), &cli.projects, &cancel)
        .await
    {
        Ok(report) => report,
        Err(e @ (SyncError::InvalidCommand(_) | SyncError::NoProjects)) => {
            eprintln!("❌ {}", e);
            Cli::command().print_help().context("Failed to print usage")?;
            std::process::exit(EXIT_FAILURE);
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(e.exit_code());
        }
    };

    for line in summary_lines(&report) {
        eprintln!("{}", line);
    }

    let code = report.exit_code();
    info!(projects = report.results.len(), exit_code = code, "Sync finished");
    std::process::exit(code);
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
