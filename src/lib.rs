//! Ephemeral container services for integration tests.
//!
//! A test process asks an [`Orchestrator`] for a service described by an
//! [`ImageDescriptor`]. The first request launches a container, later
//! requests for the same descriptor id share it. Each launched container
//! gets an engine-side expiration so nothing outlives a crashed run, and
//! [`Orchestrator::close`] (or SIGINT/SIGTERM) purges everything.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testrc::images::DynamoDbLocal;
//! use testrc::{Orchestrator, PoolConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::bootstrap(PoolConfig::resolve()?).await?;
//! let dynamo = orchestrator.roll(Arc::new(DynamoDbLocal::new())).await?;
//! dynamo.ready().await?;
//! println!("DynamoDB Local at {}", dynamo.http_url());
//! orchestrator.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod image;
pub mod images;
pub mod orchestrator;
pub mod ready;
pub mod registry;
pub mod store;
pub mod teardown;
pub mod testing;

pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use image::ImageDescriptor;
pub use orchestrator::Orchestrator;
pub use store::InstanceStore;
pub use teardown::TeardownReport;
