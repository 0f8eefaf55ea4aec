//! `testrc up`: launch one service and hold it.

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;

use crate::config::PoolConfig;
use crate::image::ImageDescriptor;
use crate::images::{DynamoDbLocal, GenericImage, Probe};
use crate::orchestrator::Orchestrator;

#[derive(Args, Debug, Clone)]
pub struct UpCommand {
    /// Built-in service to launch ("dynamodb")
    #[arg(conflicts_with = "image")]
    pub service: Option<String>,

    /// Run the built-in service without persistence, where supported
    #[arg(long)]
    pub in_memory: bool,

    /// Arbitrary image tag to launch instead of a built-in service
    #[arg(long)]
    pub image: Option<String>,

    /// Container port serving HTTP (required with --image)
    #[arg(long, requires = "image")]
    pub http_port: Option<u16>,

    /// Container port serving HTTPS (defaults to --http-port)
    #[arg(long, requires = "image")]
    pub https_port: Option<u16>,

    /// `KEY=value` or `cmd=...` entries passed to the container
    #[arg(long = "env", requires = "image")]
    pub env: Vec<String>,

    /// Registry id for the service (defaults to the image tag)
    #[arg(long, requires = "image")]
    pub id: Option<String>,

    /// Probe readiness with `GET <path>` instead of a TCP connect
    #[arg(long, requires = "image")]
    pub probe_path: Option<String>,
}

impl UpCommand {
    /// The descriptor this invocation asks for.
    pub fn descriptor(&self) -> anyhow::Result<Arc<dyn ImageDescriptor>> {
        if let Some(tag) = &self.image {
            let http_port = self
                .http_port
                .context("--http-port is required with --image")?;
            let mut image = GenericImage::new(tag.clone(), http_port)
                .with_https_port(self.https_port.unwrap_or(http_port));
            for var in &self.env {
                image = image.with_env(var.clone());
            }
            if let Some(id) = &self.id {
                image = image.with_id(id.clone());
            }
            if let Some(path) = &self.probe_path {
                image = image.with_probe(Probe::Http { path: path.clone() });
            }
            return Ok(Arc::new(image));
        }

        match self.service.as_deref() {
            Some("dynamodb") | Some("dynamodb-local") => {
                let image = DynamoDbLocal::new();
                let image = if self.in_memory { image.in_memory() } else { image };
                Ok(Arc::new(image))
            }
            Some(other) => bail!("Unknown service '{}'. Known services: dynamodb", other),
            None => bail!("Specify a service (e.g. `dynamodb`) or --image"),
        }
    }
}

/// Launch the requested service, wait for readiness, print its endpoints,
/// then hold it until the signal handler tears everything down.
pub async fn run_up_command(cmd: UpCommand) -> anyhow::Result<()> {
    let descriptor = cmd.descriptor()?;
    let config = PoolConfig::resolve()?;

    let orchestrator = Orchestrator::bootstrap(config).await?;
    let store = orchestrator.roll(descriptor).await?;

    if let Err(e) = store.ready().await {
        if let Err(teardown) = orchestrator.close().await {
            tracing::error!(error = %teardown, "Teardown after failed readiness also failed");
        }
        return Err(e.into());
    }

    println!("{} is ready", store.image().tag());
    println!("  container: {}", store.resource().name);
    println!("  http:      {}", store.http_url());
    println!("  https:     {}", store.https_url());
    println!();
    println!("Press Ctrl+C to stop.");

    // The signal handler purges and exits the process.
    std::future::pending::<()>().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up() -> UpCommand {
        UpCommand {
            service: None,
            in_memory: false,
            image: None,
            http_port: None,
            https_port: None,
            env: Vec::new(),
            id: None,
            probe_path: None,
        }
    }

    #[test]
    fn test_dynamodb_descriptor() {
        let cmd = UpCommand {
            service: Some("dynamodb".to_string()),
            in_memory: true,
            ..up()
        };
        let image = cmd.descriptor().unwrap();
        assert_eq!(image.id(), "dynamodb-local");
        assert_eq!(image.env_vars().len(), 1);
    }

    #[test]
    fn test_generic_descriptor() {
        let cmd = UpCommand {
            image: Some("redis:7".to_string()),
            http_port: Some(6379),
            id: Some("cache".to_string()),
            ..up()
        };
        let image = cmd.descriptor().unwrap();
        assert_eq!(image.id(), "cache");
        assert_eq!(image.tag(), "redis:7");
        assert_eq!(image.https_port(), 6379);
    }

    #[test]
    fn test_unknown_or_missing_service() {
        let unknown = UpCommand {
            service: Some("postgres".to_string()),
            ..up()
        };
        assert!(unknown.descriptor().is_err());
        assert!(up().descriptor().is_err());

        let no_port = UpCommand {
            image: Some("redis:7".to_string()),
            ..up()
        };
        assert!(no_port.descriptor().is_err());
    }
}
