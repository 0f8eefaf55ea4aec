//! CLI command handling.
//!
//! Provides subcommands for:
//! - Launching a service and holding it until interrupted (`up`)
//! - Locating or booting the Docker daemon (`daemon`)

mod daemon;
mod up;

pub use daemon::run_daemon_command;
pub use up::{UpCommand, run_up_command};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "testrc")]
#[command(about = "Ephemeral containers for integration tests")]
#[command(
    long_about = "Launches service containers the way the test harness does and keeps them up until interrupted.\nExamples:\n  testrc up dynamodb\n  testrc up --image redis:7 --http-port 6379"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a service and print its endpoints
    #[command(
        about = "Launch a service container",
        long_about = "Launches one service, waits for it to pass its readiness probe, prints its endpoints, then holds it until Ctrl+C.\nExamples:\n  testrc up dynamodb --in-memory\n  testrc up --image nginx:alpine --http-port 80 --probe-path /"
    )]
    Up(UpCommand),

    /// Locate the Docker daemon, booting one if no socket exists
    #[command(
        about = "Locate or boot the Docker daemon",
        long_about = "Resolves DOCKER_HOST (default /var/run/docker.sock). If the socket is missing, starts dockerd in a scratch directory and keeps it running until Ctrl+C.\nExample: testrc daemon"
    )]
    Daemon,
}
