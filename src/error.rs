//! Error types for the container pool.

use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while locating, booting, or connecting to the container daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The fallback daemon process could not be started.
    #[error("Failed to spawn daemon '{binary}': {reason}")]
    SpawnFailed { binary: String, reason: String },

    /// The client could not be constructed for the endpoint.
    #[error("Failed to connect to daemon at {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// The daemon never answered a ping before the deadline.
    #[error("Daemon at {endpoint} did not answer within {waited:?}")]
    DeadlineExceeded { endpoint: String, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine did not answer a ping.
    #[error("Container engine unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Failed to pull image '{image}': {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Failed to create container for '{image}': {reason}")]
    Create { image: String, reason: String },

    #[error("Failed to start container '{name}': {reason}")]
    Start { name: String, reason: String },

    #[error("Failed to inspect container '{name}': {reason}")]
    Inspect { name: String, reason: String },

    /// The engine reported no host binding for a declared container port.
    #[error("Container '{name}' has no host mapping for port {port}/tcp")]
    PortNotMapped { name: String, port: u16 },

    #[error("Failed to set expiration on container '{name}': {reason}")]
    Expire { name: String, reason: String },

    #[error("Failed to purge container '{name}': {reason}")]
    Purge { name: String, reason: String },

    /// Backoff ceiling reached without the probe succeeding.
    #[error("Gave up after {attempts} attempts over {elapsed:?}: {last_error}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },
}

/// Errors returned by an image's readiness probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP probe failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service answered but is not ready yet.
    #[error("Service not ready: {0}")]
    Unhealthy(String),
}

/// Terminal readiness outcomes.
///
/// Cloneable so every waiter on an instance observes an identical value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("Container for '{image}' never became ready after {attempts} attempts over {elapsed:?}: {reason}")]
    ProbeExhausted {
        image: String,
        attempts: u32,
        elapsed: Duration,
        reason: String,
    },

    /// The readiness task ended without reporting an outcome.
    #[error("Readiness task for '{image}' ended without reporting")]
    Abandoned { image: String },

    #[error("Timed out after {waited:?} waiting for '{image}' to become ready")]
    DeadlineExceeded { image: String, waited: Duration },
}

/// Top-level error for pool and orchestrator operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    /// The descriptor cannot be launched as described.
    #[error("Invalid image descriptor '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("Could not set up container for '{image}': {source}")]
    Launch {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("Could not set expiration for '{image}': {source}")]
    Expire {
        image: String,
        #[source]
        source: EngineError,
    },

    /// The orchestrator has already been torn down.
    #[error("Container pool is closed")]
    Closed,

    #[error("Failed to purge {failed} of {total} containers: {details}")]
    Teardown {
        failed: usize,
        total: usize,
        details: String,
    },
}

impl PoolError {
    /// Whether the error means the test run cannot meaningfully continue.
    ///
    /// Only a malformed descriptor and a closed pool are reported back to
    /// the caller as soft errors.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidDescriptor { .. } | Self::Closed)
    }
}
