//! Configuration for the container pool.
//!
//! Everything is read from the process environment. The binary loads a
//! `.env` file with `dotenvy` first; the library never touches files.

mod daemon;
pub(crate) mod helpers;

use std::time::Duration;

pub use daemon::{DEFAULT_DOCKER_SOCKET, DaemonConfig};

use crate::config::helpers::{EnvLookup, optional_env, parse_optional_env, process_env};
use crate::engine::BackoffPolicy;
use crate::error::ConfigError;

/// Hard lifetime of every launched container.
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(600);

/// Top-level pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub daemon: DaemonConfig,
    /// Engine-side expiration set on each launched container.
    pub expire_after: Duration,
    /// Backoff used while polling a descriptor's readiness probe.
    pub readiness: BackoffPolicy,
    /// Host used in endpoints when the engine reports a wildcard bind.
    pub host_address: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            expire_after: DEFAULT_EXPIRE_AFTER,
            readiness: BackoffPolicy::default(),
            host_address: None,
        }
    }
}

impl PoolConfig {
    /// Resolve from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(&process_env)
    }

    pub(crate) fn resolve_with(lookup: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let expire_secs: u64 =
            parse_optional_env(lookup, "TESTRC_EXPIRE_SECS", defaults.expire_after.as_secs())?;
        let max_wait_secs: u64 = parse_optional_env(
            lookup,
            "TESTRC_READY_MAX_WAIT_SECS",
            defaults.readiness.max_elapsed.as_secs(),
        )?;

        Ok(Self {
            daemon: DaemonConfig::resolve(lookup)?,
            expire_after: Duration::from_secs(expire_secs),
            readiness: BackoffPolicy {
                max_elapsed: Duration::from_secs(max_wait_secs),
                ..defaults.readiness
            },
            host_address: optional_env(lookup, "TESTRC_HOST_ADDRESS")?,
        })
    }
}
