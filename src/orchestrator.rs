//! Lifecycle orchestration: launch once, poll for readiness, tear down.
//!
//! # Flow
//!
//! ```text
//!   roll(image)
//!      │
//!      ▼
//!   ┌────────────┐  reuse   ┌──────────────────────────────┐
//!   │ ping engine│─────────▶│ registry slot already filled │──▶ return store
//!   └────────────┘          └──────────────────────────────┘
//!      │ launch
//!      ▼
//!   ┌────────────┐    ┌──────────────┐    ┌───────────────┐    ┌──────────┐
//!   │ partition  │───▶│ run container│───▶│ expire (600s) │───▶│ register │
//!   │ env / tag  │    │ (auto-remove)│    │               │    │  store   │
//!   └────────────┘    └──────────────┘    └───────────────┘    └──────────┘
//!                                                                   │
//!                               spawn: retry(image.ping) ──▶ fulfil ready
//!                                                                   │
//!                                                                   ▼
//!                                                             return store
//! ```
//!
//! `roll` returns as soon as the container is launched. Callers block on
//! [`InstanceStore::ready`] before using the endpoints.
//!
//! A store whose readiness probe gives up stays registered: later `roll`
//! calls for the same id get the same store and observe the same failure
//! from `ready()`, and teardown still purges its container.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::Instrument;

use crate::config::PoolConfig;
use crate::daemon::DaemonLocator;
use crate::engine::{DockerEngine, EnginePool, LABEL_EXPIRES_AT, LABEL_ID, Resource, RunSpec};
use crate::error::{EngineError, PoolError, ReadinessError, Result};
use crate::image::{ImageDescriptor, ImageRef, LaunchArgs};
use crate::ready::ReadyFulfiller;
use crate::registry::Registry;
use crate::store::InstanceStore;
use crate::teardown::{self, TeardownReport};

/// Owns the engine handle and the registry of running instances.
pub struct Orchestrator {
    pool: EnginePool,
    registry: Registry,
    config: PoolConfig,
    closed: AtomicBool,
    signal_handler: AtomicBool,
    /// Keeps a spawned daemon alive for as long as the orchestrator.
    locator: Option<DaemonLocator>,
}

impl Orchestrator {
    /// Build around an existing engine handle.
    pub fn new(pool: EnginePool, config: PoolConfig) -> Self {
        Self {
            pool,
            registry: Registry::new(),
            config,
            closed: AtomicBool::new(false),
            signal_handler: AtomicBool::new(false),
            locator: None,
        }
    }

    /// Locate or boot the Docker daemon and connect to it.
    ///
    /// Blocks until the daemon answers, or until the configured connect
    /// deadline passes.
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        let locator = DaemonLocator::new(config.daemon.clone());
        let docker = locator.connect().await?;

        let engine = DockerEngine::new(docker, config.host_address.clone());
        match engine.reap_expired().await {
            Ok(reaped) if !reaped.is_empty() => {
                tracing::info!(count = reaped.len(), "Reaped expired containers from earlier runs");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not reap expired containers"),
        }
        let pool = EnginePool::new(Arc::new(engine), config.readiness);

        let mut orchestrator = Self::new(pool, config);
        orchestrator.locator = Some(locator);
        Ok(orchestrator)
    }

    /// [`connect`](Self::connect), then install the SIGINT/SIGTERM teardown.
    pub async fn bootstrap(config: PoolConfig) -> Result<Arc<Self>> {
        let orchestrator = Arc::new(Self::connect(config).await?);
        orchestrator.install_signal_teardown();
        Ok(orchestrator)
    }

    /// Install the signal-driven teardown. Later calls do nothing.
    pub fn install_signal_teardown(self: &Arc<Self>) {
        if self.signal_handler.swap(true, Ordering::SeqCst) {
            return;
        }
        teardown::spawn_signal_teardown(self.clone());
        tracing::debug!("Installed signal teardown handler");
    }

    /// Get a running instance of `image`, launching it if this orchestrator
    /// has none yet.
    ///
    /// Returns without waiting for readiness.
    pub async fn roll(&self, image: Arc<dyn ImageDescriptor>) -> Result<Arc<InstanceStore>> {
        let start = Instant::now();

        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let tag = image.tag();
        let span = tracing::info_span!(
            "roll",
            image = %tag,
            id = %image.id(),
            http = image.http_port(),
        );

        self.roll_in_span(image, start).instrument(span).await
    }

    async fn roll_in_span(
        &self,
        image: Arc<dyn ImageDescriptor>,
        start: Instant,
    ) -> Result<Arc<InstanceStore>> {
        if let Err(e) = self.pool.ping().await {
            tracing::error!(error = %e, "Could not connect to container engine");
            return Err(e.into());
        }

        let id = image.id().to_string();
        if id.trim().is_empty() {
            return Err(PoolError::InvalidDescriptor {
                id,
                reason: "descriptor id is empty".to_string(),
            });
        }

        let mut pending = None;
        let slot = &mut pending;
        let image_ref = &image;
        let (store, launched) = self
            .registry
            .get_or_launch(&id, move || async move {
                let (store, fulfiller) = self.launch(image_ref).await?;
                *slot = Some(fulfiller);
                Ok::<_, PoolError>(store)
            })
            .await?;

        // close() may have taken its purge list while this launch was in
        // flight.
        if self.is_closed() {
            if launched {
                tracing::warn!(container = %store.resource().name, "Pool closed during launch");
                self.discard(store.resource()).await;
            }
            return Err(PoolError::Closed);
        }

        if !launched {
            tracing::info!("Reusing existing container");
            return Ok(store);
        }

        // Registered before the readiness task starts.
        if let Some(fulfiller) = pending {
            self.spawn_readiness(store.clone(), fulfiller);
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Mock containers started"
        );
        Ok(store)
    }

    /// Launch the container and build its store. Does not register it.
    async fn launch(
        &self,
        image: &Arc<dyn ImageDescriptor>,
    ) -> Result<(Arc<InstanceStore>, ReadyFulfiller)> {
        let tag = image.tag();
        let reference = ImageRef::parse(&tag).map_err(|reason| PoolError::InvalidDescriptor {
            id: image.id().to_string(),
            reason,
        })?;
        let args = LaunchArgs::partition(&image.env_vars());

        let mut exposed_ports = vec![image.http_port()];
        if image.https_port() != image.http_port() {
            exposed_ports.push(image.https_port());
        }

        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(self.config.expire_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));

        let spec = RunSpec {
            repository: reference.repository,
            tag: reference.version,
            env: args.env,
            cmd: args.cmd,
            exposed_ports,
            auto_remove: true,
            labels: HashMap::from([
                (LABEL_ID.to_string(), image.id().to_string()),
                (LABEL_EXPIRES_AT.to_string(), expires_at.to_rfc3339()),
            ]),
        };

        tracing::info!(https = image.https_port(), "Creating new container");

        let resource = self.pool.run(&spec).await.map_err(|source| {
            tracing::error!(error = %source, "Could not set up resource");
            PoolError::Launch {
                image: tag.clone(),
                source,
            }
        })?;

        if let Err(source) = self
            .pool
            .expire(&resource, self.config.expire_after)
            .await
        {
            tracing::error!(error = %source, container = %resource.name, "Could not set expiration");
            self.discard(&resource).await;
            return Err(PoolError::Expire { image: tag, source });
        }

        let endpoints = resource
            .endpoint("http", image.http_port())
            .and_then(|http| {
                resource
                    .endpoint("https", image.https_port())
                    .map(|https| (http, https))
            });
        let (http, https) = match endpoints {
            Ok(pair) => pair,
            Err(source) => {
                tracing::error!(error = %source, container = %resource.name, "Port mapping missing");
                self.discard(&resource).await;
                return Err(PoolError::Launch { image: tag, source });
            }
        };

        tracing::info!(container = %resource.name, %http, %https, "Starting new container");

        let (store, fulfiller) = InstanceStore::new(image.clone(), resource, http, https);
        Ok((Arc::new(store), fulfiller))
    }

    /// Purge a container that never made it into the registry.
    async fn discard(&self, resource: &Resource) {
        if let Err(e) = self.pool.purge(resource).await {
            tracing::warn!(error = %e, container = %resource.name, "Could not purge unregistered container");
        }
    }

    /// Poll the descriptor's probe in the background and publish the outcome.
    fn spawn_readiness(&self, store: Arc<InstanceStore>, fulfiller: ReadyFulfiller) {
        let pool = self.pool.clone();
        let span = tracing::info_span!("readiness", image = %store.image().tag());

        tracing::info!("Waiting for container to be ready");

        tokio::spawn(
            async move {
                let start = Instant::now();
                let image = store.image().clone();

                let result = pool
                    .retry(|| {
                        let store = store.clone();
                        let image = image.clone();
                        async move {
                            tracing::debug!("Waiting for container... (retrying)");
                            image.ping(&store).await
                        }
                    })
                    .await;

                let outcome = match result {
                    Ok(attempts) => {
                        tracing::info!(
                            attempts,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Container is ready"
                        );
                        Ok(())
                    }
                    Err(EngineError::RetryExhausted {
                        attempts,
                        elapsed,
                        last_error,
                    }) => {
                        tracing::error!(
                            attempts,
                            elapsed_ms = elapsed.as_millis() as u64,
                            error = %last_error,
                            "Container never became ready"
                        );
                        Err(ReadinessError::ProbeExhausted {
                            image: image.tag(),
                            attempts,
                            elapsed,
                            reason: last_error,
                        })
                    }
                    Err(other) => Err(ReadinessError::ProbeExhausted {
                        image: image.tag(),
                        attempts: 0,
                        elapsed: start.elapsed(),
                        reason: other.to_string(),
                    }),
                };

                fulfiller.fulfill(outcome);
            }
            .instrument(span),
        );
    }

    /// Purge every registered container. Runs at most once; later calls
    /// return an empty report.
    pub async fn close(&self) -> Result<TeardownReport> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(TeardownReport::default());
        }
        teardown::purge_all(&self.pool, self.registry.stores()).await
    }

    /// Stop the daemon this orchestrator booted, if it booted one.
    pub async fn shutdown_daemon(&self) {
        if let Some(locator) = &self.locator {
            locator.shutdown().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The registered instance for a descriptor id.
    pub fn get(&self, id: &str) -> Option<Arc<InstanceStore>> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if !self.is_closed() && !self.registry.is_empty() {
            tracing::warn!(
                "Orchestrator dropped without close(), {} container(s) left to expire",
                self.registry.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::BackoffPolicy;
    use crate::testing::{StubEngine, StubImage};

    fn orchestrator(engine: Arc<StubEngine>) -> Orchestrator {
        let config = PoolConfig {
            readiness: BackoffPolicy::constant(Duration::from_millis(5), Duration::from_secs(2)),
            ..Default::default()
        };
        Orchestrator::new(EnginePool::new(engine, config.readiness), config)
    }

    #[tokio::test]
    async fn test_launch_spec_from_descriptor() {
        let engine = Arc::new(StubEngine::new());
        let orch = orchestrator(engine.clone());

        let image = StubImage::new("svc")
            .with_tag("ghcr.io/acme/svc")
            .with_ports(8080, 8443)
            .with_env(["cmd=serve --port 8080", "MODE=test"]);
        orch.roll(Arc::new(image)).await.unwrap();

        let runs = engine.runs();
        assert_eq!(runs.len(), 1);
        let spec = &runs[0];
        assert_eq!(spec.repository, "ghcr.io/acme/svc");
        assert_eq!(spec.tag, "latest");
        assert_eq!(spec.cmd, vec!["serve", "--port", "8080"]);
        assert_eq!(spec.env, vec!["MODE=test"]);
        assert_eq!(spec.exposed_ports, vec![8080, 8443]);
        assert!(spec.auto_remove);
        assert_eq!(spec.labels.get(LABEL_ID).map(String::as_str), Some("svc"));
        assert!(spec.labels.contains_key(LABEL_EXPIRES_AT));

        let expirations = engine.expirations();
        assert_eq!(expirations.len(), 1);
        assert_eq!(expirations[0].1, Duration::from_secs(600));
        orch.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_port_exposed_once() {
        let engine = Arc::new(StubEngine::new());
        let orch = orchestrator(engine.clone());

        orch.roll(Arc::new(StubImage::new("dynamo").with_ports(8000, 8000)))
            .await
            .unwrap();
        assert_eq!(engine.runs()[0].exposed_ports, vec![8000]);
        orch.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_id_is_soft_error() {
        let engine = Arc::new(StubEngine::new());
        let orch = orchestrator(engine.clone());

        let err = orch.roll(Arc::new(StubImage::new(""))).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidDescriptor { .. }));
        assert!(!err.is_fatal());
        assert!(engine.runs().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_fatal() {
        let engine = Arc::new(StubEngine::new());
        engine.set_reachable(false);
        let orch = orchestrator(engine.clone());

        let err = orch.roll(Arc::new(StubImage::new("svc"))).await.unwrap_err();
        assert!(matches!(err, PoolError::Engine(_)));
        assert!(err.is_fatal());
        assert!(engine.runs().is_empty());
    }

    #[tokio::test]
    async fn test_expire_failure_purges_container() {
        let engine = Arc::new(StubEngine::new());
        engine.fail_expire(true);
        let orch = orchestrator(engine.clone());

        let err = orch.roll(Arc::new(StubImage::new("svc"))).await.unwrap_err();
        assert!(matches!(err, PoolError::Expire { .. }));
        assert_eq!(engine.purged().len(), 1);
        assert!(orch.get("svc").is_none());
    }
}
