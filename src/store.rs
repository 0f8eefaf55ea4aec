//! Handle to one running container.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::Resource;
use crate::error::ReadinessError;
use crate::image::ImageDescriptor;
use crate::ready::{ReadyFulfiller, ReadySignal, ready_signal};

/// A launched service instance.
///
/// Created as soon as the container is launched, before it is known to be
/// healthy. Endpoints are fixed at creation. Call [`ready`](Self::ready)
/// before using them.
pub struct InstanceStore {
    http: String,
    https: String,
    image: Arc<dyn ImageDescriptor>,
    resource: Resource,
    ready: ReadySignal,
    launched_at: Instant,
}

impl InstanceStore {
    /// Build a store and the writer for its readiness signal.
    pub fn new(
        image: Arc<dyn ImageDescriptor>,
        resource: Resource,
        http: String,
        https: String,
    ) -> (Self, ReadyFulfiller) {
        let (fulfiller, ready) = ready_signal(image.tag());
        let store = Self {
            http,
            https,
            image,
            resource,
            ready,
            launched_at: Instant::now(),
        };
        (store, fulfiller)
    }

    /// Wait until the readiness probe has succeeded or given up.
    ///
    /// Safe to call from any number of tasks; all see the same outcome.
    pub async fn ready(&self) -> Result<(), ReadinessError> {
        self.ready.wait().await
    }

    /// [`ready`](Self::ready) with a deadline.
    pub async fn ready_within(&self, timeout: Duration) -> Result<(), ReadinessError> {
        self.ready.wait_within(timeout).await
    }

    /// The readiness outcome if it is already known.
    pub fn ready_state(&self) -> Option<Result<(), ReadinessError>> {
        self.ready.peek()
    }

    /// `http://host:port` for the descriptor's HTTP port.
    pub fn http_url(&self) -> &str {
        &self.http
    }

    /// `https://host:port` for the descriptor's HTTPS port.
    pub fn https_url(&self) -> &str {
        &self.https
    }

    /// `host:port` for the HTTP port, without the scheme.
    pub fn http_host(&self) -> &str {
        strip_scheme(&self.http)
    }

    /// `host:port` for the HTTPS port, without the scheme.
    pub fn https_host(&self) -> &str {
        strip_scheme(&self.https)
    }

    pub fn image(&self) -> &Arc<dyn ImageDescriptor> {
        &self.image
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Time since the container was launched.
    pub fn age(&self) -> Duration {
        self.launched_at.elapsed()
    }
}

impl std::fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStore")
            .field("id", &self.image.id())
            .field("http", &self.http)
            .field("https", &self.https)
            .field("container", &self.resource.name)
            .finish()
    }
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map_or(url, |(_, rest)| rest)
}
