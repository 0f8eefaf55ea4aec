//! Ready-made image descriptors.

mod dynamodb;
mod generic;

use std::time::Duration;

pub use dynamodb::DynamoDbLocal;
pub use generic::{GenericImage, Probe};

/// Per-request timeout for readiness probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn probe_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
