//! The image descriptor contract.
//!
//! A descriptor says what to launch (tag, ports, env) and how to tell when
//! the service inside is usable (`ping`). The orchestrator treats
//! descriptors as opaque strategy objects and keys its registry on
//! [`ImageDescriptor::id`].

mod launch;
mod reference;

use async_trait::async_trait;

pub use launch::{CMD_MARKER, LaunchArgs};
pub use reference::{DEFAULT_VERSION, ImageRef};

use crate::error::ProbeError;
use crate::store::InstanceStore;

/// One launchable service.
#[async_trait]
pub trait ImageDescriptor: Send + Sync {
    /// Stable identity. Two descriptors with the same id are the same
    /// service and share one container per orchestrator.
    fn id(&self) -> &str;

    /// `repository` or `repository:version`.
    fn tag(&self) -> String;

    /// Container port serving plain HTTP.
    fn http_port(&self) -> u16;

    /// Container port serving HTTPS. May equal [`http_port`](Self::http_port).
    fn https_port(&self) -> u16;

    /// `KEY=value` entries, plus optional `cmd=...` command overrides.
    fn env_vars(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lightweight health call against the running instance.
    async fn ping(&self, store: &InstanceStore) -> Result<(), ProbeError>;
}
