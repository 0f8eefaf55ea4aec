//! Container engine access.
//!
//! All container operations go through an [`EnginePool`], a cheap-to-clone
//! handle over a [`ContainerEngine`] backend. The production backend is
//! [`DockerEngine`] (bollard); tests plug in `testing::StubEngine`.
//!
//! ```text
//!   Orchestrator ──▶ EnginePool ──▶ dyn ContainerEngine ──▶ Docker daemon
//!                        │
//!                        └── retry(probe) with BackoffPolicy
//! ```

mod backoff;
mod docker;
mod expiry;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use backoff::BackoffPolicy;
pub use docker::{DockerEngine, map_host_ports};
pub use expiry::label_expired;

use crate::error::EngineError;

/// Label carrying the descriptor id on every launched container.
pub const LABEL_ID: &str = "testrc.id";
/// Label carrying the RFC 3339 expiration time.
pub const LABEL_EXPIRES_AT: &str = "testrc.expires-at";

/// Everything the engine needs to launch one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub repository: String,
    pub tag: String,
    pub env: Vec<String>,
    /// Command override; empty keeps the image default.
    pub cmd: Vec<String>,
    /// Container ports published as TCP on random host ports.
    pub exposed_ports: Vec<u16>,
    /// Ask the engine to remove the container once it stops.
    pub auto_remove: bool,
    pub labels: HashMap<String, String>,
}

impl RunSpec {
    /// Full image reference, `repository:tag`.
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// A launched container, opaque beyond its identity and port mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: String,
    pub name: String,
    /// `"<port>/tcp"` to `"host:port"`.
    pub ports: HashMap<String, String>,
}

impl Resource {
    /// The `host:port` the engine bound for a container TCP port.
    pub fn host_port(&self, container_port: u16) -> Option<&str> {
        self.ports
            .get(&format!("{container_port}/tcp"))
            .map(String::as_str)
    }

    /// `scheme://host:port` for a container TCP port.
    pub fn endpoint(&self, scheme: &str, container_port: u16) -> Result<String, EngineError> {
        self.host_port(container_port)
            .map(|hp| format!("{scheme}://{hp}"))
            .ok_or_else(|| EngineError::PortNotMapped {
                name: self.name.clone(),
                port: container_port,
            })
    }
}

/// Backend operations the pool needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine answers.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Pull if needed, create, and start a container.
    async fn run(&self, spec: &RunSpec) -> Result<Resource, EngineError>;

    /// Arrange for the container to be removed after `ttl` regardless of
    /// whether teardown ever runs.
    async fn expire(&self, resource: &Resource, ttl: Duration) -> Result<(), EngineError>;

    /// Forcibly stop and remove the container.
    async fn purge(&self, resource: &Resource) -> Result<(), EngineError>;
}

/// Shared handle to the container engine.
#[derive(Clone)]
pub struct EnginePool {
    engine: Arc<dyn ContainerEngine>,
    backoff: BackoffPolicy,
}

impl EnginePool {
    pub fn new(engine: Arc<dyn ContainerEngine>, backoff: BackoffPolicy) -> Self {
        Self { engine, backoff }
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        self.engine.ping().await
    }

    pub async fn run(&self, spec: &RunSpec) -> Result<Resource, EngineError> {
        self.engine.run(spec).await
    }

    pub async fn expire(&self, resource: &Resource, ttl: Duration) -> Result<(), EngineError> {
        self.engine.expire(resource, ttl).await
    }

    pub async fn purge(&self, resource: &Resource) -> Result<(), EngineError> {
        self.engine.purge(resource).await
    }

    /// Retry `probe` with exponential backoff until it succeeds or the
    /// backoff ceiling is reached.
    pub async fn retry<F, Fut, E>(&self, probe: F) -> Result<u32, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        self.backoff.retry(probe).await
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }
}

impl std::fmt::Debug for EnginePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginePool")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
