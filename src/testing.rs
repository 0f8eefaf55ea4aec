//! In-memory stand-ins for the container engine and image descriptors.
//!
//! Provides:
//! - [`StubEngine`]: A [`ContainerEngine`] that records every call and
//!   hands out fake port mappings on 127.0.0.1
//! - [`StubImage`]: A configurable [`ImageDescriptor`] whose probe succeeds
//!   after a set number of calls
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testrc::engine::{BackoffPolicy, EnginePool};
//! use testrc::testing::{StubEngine, StubImage};
//! use testrc::{Orchestrator, PoolConfig};
//!
//! # async fn demo() -> testrc::Result<()> {
//! let engine = Arc::new(StubEngine::new());
//! let pool = EnginePool::new(engine.clone(), BackoffPolicy::default());
//! let orchestrator = Orchestrator::new(pool, PoolConfig::default());
//! let store = orchestrator.roll(Arc::new(StubImage::new("svc"))).await?;
//! store.ready().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::{ContainerEngine, Resource, RunSpec};
use crate::error::{EngineError, ProbeError};
use crate::image::ImageDescriptor;
use crate::store::InstanceStore;

/// First host port handed out by [`StubEngine`].
pub const STUB_FIRST_HOST_PORT: u16 = 49155;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A recording container engine.
///
/// Supports:
/// - Call recording via [`runs()`](Self::runs),
///   [`expirations()`](Self::expirations) and [`purged()`](Self::purged)
/// - Runtime failure toggling per operation
/// - Artificial run and purge delays for exercising races and concurrent
///   teardown
pub struct StubEngine {
    reachable: AtomicBool,
    fail_run: AtomicBool,
    fail_expire: AtomicBool,
    fail_purge: Mutex<HashSet<String>>,
    run_delay: Duration,
    purge_delay: Duration,
    next_port: AtomicU16,
    next_id: AtomicU32,
    runs: Mutex<Vec<RunSpec>>,
    expirations: Mutex<Vec<(String, Duration)>>,
    purged: Mutex<Vec<String>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            fail_run: AtomicBool::new(false),
            fail_expire: AtomicBool::new(false),
            fail_purge: Mutex::new(HashSet::new()),
            run_delay: Duration::ZERO,
            purge_delay: Duration::ZERO,
            next_port: AtomicU16::new(STUB_FIRST_HOST_PORT),
            next_id: AtomicU32::new(1),
            runs: Mutex::new(Vec::new()),
            expirations: Mutex::new(Vec::new()),
            purged: Mutex::new(Vec::new()),
        }
    }

    /// Make every run take `delay`.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Make every purge take `delay`.
    pub fn with_purge_delay(mut self, delay: Duration) -> Self {
        self.purge_delay = delay;
        self
    }

    /// Toggle whether `ping` succeeds.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Toggle whether `run` fails.
    pub fn fail_run(&self, fail: bool) {
        self.fail_run.store(fail, Ordering::SeqCst);
    }

    /// Toggle whether `expire` fails.
    pub fn fail_expire(&self, fail: bool) {
        self.fail_expire.store(fail, Ordering::SeqCst);
    }

    /// Make purging the container with this id fail.
    pub fn fail_purge_of(&self, id: &str) {
        lock(&self.fail_purge).insert(id.to_string());
    }

    /// Every spec passed to `run`, in call order. Includes failed runs.
    pub fn runs(&self) -> Vec<RunSpec> {
        lock(&self.runs).clone()
    }

    /// `(container id, ttl)` for every successful `expire`.
    pub fn expirations(&self) -> Vec<(String, Duration)> {
        lock(&self.expirations).clone()
    }

    /// Ids of successfully purged containers.
    pub fn purged(&self) -> Vec<String> {
        lock(&self.purged).clone()
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Unreachable {
                reason: "stub engine is offline".to_string(),
            })
        }
    }

    async fn run(&self, spec: &RunSpec) -> Result<Resource, EngineError> {
        lock(&self.runs).push(spec.clone());
        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(EngineError::Create {
                image: spec.image(),
                reason: "stub engine refused to run".to_string(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let ports: HashMap<String, String> = spec
            .exposed_ports
            .iter()
            .map(|port| {
                let host = self.next_port.fetch_add(1, Ordering::SeqCst);
                (format!("{port}/tcp"), format!("127.0.0.1:{host}"))
            })
            .collect();

        Ok(Resource {
            id: format!("stub-{n:04}"),
            name: format!("testrc-stub-{n}"),
            ports,
        })
    }

    async fn expire(&self, resource: &Resource, ttl: Duration) -> Result<(), EngineError> {
        if self.fail_expire.load(Ordering::SeqCst) {
            return Err(EngineError::Expire {
                name: resource.name.clone(),
                reason: "stub engine refused to expire".to_string(),
            });
        }
        lock(&self.expirations).push((resource.id.clone(), ttl));
        Ok(())
    }

    async fn purge(&self, resource: &Resource) -> Result<(), EngineError> {
        if !self.purge_delay.is_zero() {
            tokio::time::sleep(self.purge_delay).await;
        }
        if lock(&self.fail_purge).contains(&resource.id) {
            return Err(EngineError::Purge {
                name: resource.name.clone(),
                reason: "stub engine refused to purge".to_string(),
            });
        }
        lock(&self.purged).push(resource.id.clone());
        Ok(())
    }
}

/// A configurable image descriptor for tests.
///
/// Defaults: tag equal to the id, ports 8000/8000, no env, and a probe that
/// succeeds on the first call.
pub struct StubImage {
    id: String,
    tag: String,
    http_port: u16,
    https_port: u16,
    env: Vec<String>,
    /// Probe calls that fail before the first success.
    fail_first: u32,
    always_fail: bool,
    ping_count: AtomicU32,
}

impl StubImage {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let tag = if id.trim().is_empty() {
            "stub".to_string()
        } else {
            id.clone()
        };
        Self {
            id,
            tag,
            http_port: 8000,
            https_port: 8000,
            env: Vec::new(),
            fail_first: 0,
            always_fail: false,
            ping_count: AtomicU32::new(0),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_ports(mut self, http: u16, https: u16) -> Self {
        self.http_port = http;
        self.https_port = https;
        self
    }

    pub fn with_env<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = vars.into_iter().map(Into::into).collect();
        self
    }

    /// Succeed on probe call number `calls`.
    pub fn ready_after(mut self, calls: u32) -> Self {
        self.fail_first = calls.saturating_sub(1);
        self
    }

    /// Never pass the probe.
    pub fn failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Number of probe calls so far.
    pub fn ping_calls(&self) -> u32 {
        self.ping_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageDescriptor for StubImage {
    fn id(&self) -> &str {
        &self.id
    }

    fn tag(&self) -> String {
        self.tag.clone()
    }

    fn http_port(&self) -> u16 {
        self.http_port
    }

    fn https_port(&self) -> u16 {
        self.https_port
    }

    fn env_vars(&self) -> Vec<String> {
        self.env.clone()
    }

    async fn ping(&self, _store: &InstanceStore) -> Result<(), ProbeError> {
        let call = self.ping_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail {
            return Err(ProbeError::Unhealthy("stub never becomes ready".to_string()));
        }
        if call <= self.fail_first {
            return Err(ProbeError::Unhealthy(format!("stub not ready (call {call})")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ports: Vec<u16>) -> RunSpec {
        RunSpec {
            repository: "stub".to_string(),
            tag: "latest".to_string(),
            env: Vec::new(),
            cmd: Vec::new(),
            exposed_ports: ports,
            auto_remove: true,
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_stub_engine_assigns_distinct_ports() {
        let engine = StubEngine::new();
        let a = engine.run(&spec(vec![8000, 8443])).await.unwrap();
        let b = engine.run(&spec(vec![8000])).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.host_port(8000), Some("127.0.0.1:49155"));
        assert_eq!(a.host_port(8443), Some("127.0.0.1:49156"));
        assert_eq!(b.host_port(8000), Some("127.0.0.1:49157"));
        assert_eq!(engine.runs().len(), 2);
    }

    #[tokio::test]
    async fn test_stub_engine_failure_toggles() {
        let engine = StubEngine::new();
        engine.set_reachable(false);
        assert!(engine.ping().await.is_err());

        engine.fail_run(true);
        assert!(engine.run(&spec(vec![8000])).await.is_err());
        engine.fail_run(false);

        let r = engine.run(&spec(vec![8000])).await.unwrap();
        engine.fail_purge_of(&r.id);
        assert!(engine.purge(&r).await.is_err());
        assert!(engine.purged().is_empty());
    }

    #[test]
    fn test_stub_image_defaults() {
        let image = StubImage::new("svc");
        assert_eq!(image.tag(), "svc");
        assert_eq!(image.http_port(), 8000);
        assert_eq!(StubImage::new("").tag(), "stub");
    }
}
