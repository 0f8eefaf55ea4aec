//! testrc - Main entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use testrc::cli::{Cli, Command, run_daemon_command, run_up_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("testrc=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Up(cmd) => run_up_command(cmd).await,
        Command::Daemon => run_daemon_command().await,
    }
}
