use std::time::Duration;

use crate::config::helpers::{EnvLookup, optional_env, parse_env, parse_optional_env};
use crate::error::ConfigError;

/// Socket probed when `DOCKER_HOST` is unset.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// How to find (or boot) the container daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Endpoint from `DOCKER_HOST`; `None` means [`DEFAULT_DOCKER_SOCKET`].
    pub endpoint: Option<String>,
    /// Daemon binary spawned when no local socket exists.
    pub dockerd_binary: String,
    /// Fixed interval between connection pings.
    pub poll_interval: Duration,
    /// Give up connecting after this long. `None` waits forever.
    pub connect_timeout: Option<Duration>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            dockerd_binary: "dockerd".to_string(),
            poll_interval: Duration::from_secs(1),
            connect_timeout: None,
        }
    }
}

impl DaemonConfig {
    pub(crate) fn resolve(lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_ms: u64 = parse_optional_env(
            lookup,
            "TESTRC_DAEMON_POLL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?;
        if poll_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TESTRC_DAEMON_POLL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            endpoint: optional_env(lookup, "DOCKER_HOST")?,
            dockerd_binary: optional_env(lookup, "TESTRC_DOCKERD_BIN")?
                .unwrap_or(defaults.dockerd_binary),
            poll_interval: Duration::from_millis(poll_ms),
            connect_timeout: parse_env::<u64>(lookup, "TESTRC_DAEMON_TIMEOUT_SECS")?
                .map(Duration::from_secs),
        })
    }

    /// The configured endpoint, or the default local socket.
    pub fn endpoint_or_default(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_DOCKER_SOCKET)
    }
}
