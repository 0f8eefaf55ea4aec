//! Purging every registered container.
//!
//! Teardown runs once per orchestrator, either from [`Orchestrator::close`]
//! or from the SIGINT/SIGTERM handler. All purges run concurrently and the
//! coordinator waits for every one of them before reporting.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::signal;

use crate::engine::EnginePool;
use crate::error::{EngineError, PoolError, Result};
use crate::orchestrator::Orchestrator;
use crate::store::InstanceStore;

/// Outcome of a successful teardown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    /// Names of purged containers.
    pub purged: Vec<String>,
}

/// Purge all `stores` concurrently and wait for every purge to finish.
///
/// Any failed purge turns the whole teardown into an error, but only after
/// the remaining purges have completed.
pub async fn purge_all(
    pool: &EnginePool,
    stores: Vec<Arc<InstanceStore>>,
) -> Result<TeardownReport> {
    let start = Instant::now();
    let total = stores.len();

    let results = join_all(stores.iter().map(|store| async move {
        let resource = store.resource();
        let result = pool.purge(resource).await;
        match &result {
            Ok(()) => {
                eprintln!("|  🛑 {} is stopped", store.image().tag());
                tracing::debug!(container = %resource.name, "Purged container");
            }
            Err(e) => tracing::error!(
                container = %resource.name,
                error = %e,
                "Could not purge resource"
            ),
        }
        (resource.name.clone(), result)
    }))
    .await;

    let (purged, failed): (Vec<_>, Vec<_>) =
        results.into_iter().partition(|(_, result)| result.is_ok());

    tracing::info!(
        purged = purged.len(),
        failed = failed.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Teardown finished"
    );

    if !failed.is_empty() {
        let details = failed
            .iter()
            .filter_map(|(_, result)| result.as_ref().err().map(EngineError::to_string))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(PoolError::Teardown {
            failed: failed.len(),
            total,
            details,
        });
    }

    Ok(TeardownReport {
        purged: purged.into_iter().map(|(name, _)| name).collect(),
    })
}

/// Resolve on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a termination signal, tear down, then exit the process.
///
/// Exits with status 0 when every purge succeeded and 1 otherwise.
pub(crate) fn spawn_signal_teardown(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        shutdown_signal().await;

        eprintln!();
        eprintln!("===============================================");
        eprintln!("|  Stopping Mock Containers...");
        eprintln!("|");

        let code = match orchestrator.close().await {
            Ok(_) => 0,
            Err(e) => {
                tracing::error!(error = %e, "Teardown failed");
                1
            }
        };

        eprintln!("|");
        eprintln!("|  mock containers stopped");
        eprintln!("===============================================");
        eprintln!();

        // process::exit skips destructors, so kill_on_drop never runs.
        orchestrator.shutdown_daemon().await;

        std::process::exit(code);
    });
}
