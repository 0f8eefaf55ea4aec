//! Finding a container daemon to talk to.
//!
//! The endpoint comes from `DOCKER_HOST`, defaulting to the well-known
//! local socket. A `tcp://` or `http://` endpoint is used as-is. A socket
//! path that exists is treated as a live local daemon. A socket path that
//! does not exist means nothing is running, so a private `dockerd` is
//! started against a temporary data directory and its output is captured
//! for diagnostics.
//!
//! After that the daemon is pinged on a fixed interval until it answers.
//! There is no retry cap, only the optional connect deadline.

mod spawn;

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use bollard::{API_DEFAULT_VERSION, Docker};
use tokio::sync::{Mutex, OnceCell};

pub use spawn::{DaemonLogs, SpawnedDaemon};

use crate::config::DaemonConfig;
use crate::error::DaemonError;

/// Client timeout for daemon requests, in seconds.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Where the daemon lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEndpoint {
    /// Local unix socket that exists.
    Unix(PathBuf),
    /// Remote daemon over HTTP.
    Tcp(String),
    /// Socket path with nothing behind it.
    Missing(PathBuf),
}

impl DaemonEndpoint {
    /// Classify a raw `DOCKER_HOST`-style value.
    pub fn resolve(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("tcp://") {
            return Self::Tcp(format!("http://{rest}"));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Self::Tcp(raw.to_string());
        }

        let path = PathBuf::from(raw.strip_prefix("unix://").unwrap_or(raw));
        if path.exists() {
            Self::Unix(path)
        } else {
            Self::Missing(path)
        }
    }

    /// Address in protocol form.
    pub fn address(&self) -> String {
        match self {
            Self::Unix(path) | Self::Missing(path) => format!("unix://{}", path.display()),
            Self::Tcp(addr) => addr.clone(),
        }
    }
}

/// Lazily connects to the daemon once and hands out the same client.
pub struct DaemonLocator {
    config: DaemonConfig,
    docker: OnceCell<Docker>,
    spawned: Mutex<Option<SpawnedDaemon>>,
}

impl DaemonLocator {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            docker: OnceCell::new(),
            spawned: Mutex::new(None),
        }
    }

    /// Connect to the daemon, booting one if necessary.
    ///
    /// The first call does the work; later calls return the same client.
    pub async fn connect(&self) -> Result<Docker, DaemonError> {
        self.docker
            .get_or_try_init(|| self.bootstrap())
            .await
            .cloned()
    }

    async fn bootstrap(&self) -> Result<Docker, DaemonError> {
        let raw = self.config.endpoint_or_default();
        tracing::info!("Using docker endpoint: {}", raw);

        let endpoint = match DaemonEndpoint::resolve(raw) {
            DaemonEndpoint::Missing(path) => {
                tracing::info!(
                    "No daemon socket at {}, starting {}",
                    path.display(),
                    self.config.dockerd_binary
                );
                let daemon = SpawnedDaemon::start(&self.config.dockerd_binary)?;
                let endpoint = DaemonEndpoint::Unix(daemon.socket().to_path_buf());
                *self.spawned.lock().await = Some(daemon);
                endpoint
            }
            other => other,
        };

        let address = endpoint.address();
        let docker = client_for(&endpoint)?;

        tracing::info!("Waiting for docker daemon at {}", address);

        let waited = wait_until_ready(
            self.config.poll_interval,
            self.config.connect_timeout,
            || {
                let docker = docker.clone();
                async move { docker.ping().await.map(|_| ()) }
            },
        )
        .await;

        if let Err(waited) = waited {
            if let Some(daemon) = self.spawned.lock().await.as_ref() {
                daemon.logs().replay();
            }
            return Err(DaemonError::DeadlineExceeded {
                endpoint: address,
                waited,
            });
        }

        tracing::info!("Docker daemon is ready");
        Ok(docker)
    }

    /// Stop the daemon this locator started, if any.
    pub async fn shutdown(&self) {
        if let Some(mut daemon) = self.spawned.lock().await.take() {
            daemon.stop().await;
        }
    }

    /// `unix://` address of the daemon this locator started, if any.
    pub async fn spawned_address(&self) -> Option<String> {
        self.spawned
            .lock()
            .await
            .as_ref()
            .map(|d| DaemonEndpoint::Unix(d.socket().to_path_buf()).address())
    }

    /// Logs of the daemon this locator started, if it started one.
    pub async fn spawned_logs(&self) -> Option<DaemonLogs> {
        self.spawned.lock().await.as_ref().map(|d| d.logs().clone())
    }
}

fn client_for(endpoint: &DaemonEndpoint) -> Result<Docker, DaemonError> {
    let address = endpoint.address();
    let connected = match endpoint {
        #[cfg(unix)]
        DaemonEndpoint::Unix(path) | DaemonEndpoint::Missing(path) => Docker::connect_with_unix(
            &path.to_string_lossy(),
            CLIENT_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        ),
        #[cfg(not(unix))]
        DaemonEndpoint::Unix(_) | DaemonEndpoint::Missing(_) => Docker::connect_with_local_defaults(),
        DaemonEndpoint::Tcp(addr) => {
            Docker::connect_with_http(addr, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
    };

    connected.map_err(|e| DaemonError::ConnectFailed {
        endpoint: address,
        reason: e.to_string(),
    })
}

/// Call `ping` every `interval` until it succeeds.
///
/// With a `deadline`, gives up once that much time has passed and returns
/// how long it waited.
pub async fn wait_until_ready<F, Fut, E>(
    interval: Duration,
    deadline: Option<Duration>,
    mut ping: F,
) -> Result<u32, Duration>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match ping().await {
            Ok(()) => return Ok(attempts),
            Err(e) => tracing::info!("Could not connect to Docker, retrying: {}", e),
        }

        if let Some(limit) = deadline
            && start.elapsed() + interval > limit
        {
            return Err(start.elapsed());
        }

        tokio::time::sleep(interval).await;
    }
}
