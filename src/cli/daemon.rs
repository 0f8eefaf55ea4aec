//! `testrc daemon`: locate or boot the Docker daemon.

use crate::config::PoolConfig;
use crate::daemon::DaemonLocator;
use crate::teardown::shutdown_signal;

/// Connect to the daemon and report where it lives.
///
/// When the daemon was booted here, keeps it alive until Ctrl+C.
pub async fn run_daemon_command() -> anyhow::Result<()> {
    let config = PoolConfig::resolve()?;
    let locator = DaemonLocator::new(config.daemon.clone());
    let docker = locator.connect().await?;

    let version = docker.version().await?;
    let version = version.version.unwrap_or_else(|| "unknown".to_string());

    match locator.spawned_address().await {
        Some(address) => {
            println!("Started docker {} at {}", version, address);
            println!("export DOCKER_HOST={}", address);
            println!();
            println!("Press Ctrl+C to stop.");
            shutdown_signal().await;
            tracing::info!("Stopping spawned daemon");
        }
        None => {
            println!(
                "Docker {} is running at {}",
                version,
                config.daemon.endpoint_or_default()
            );
        }
    }

    Ok(())
}
