//! Descriptor for arbitrary images.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::ProbeError;
use crate::image::ImageDescriptor;
use crate::images::{PROBE_TIMEOUT, probe_client};
use crate::store::InstanceStore;

/// How to decide a generic image is ready.
#[derive(Debug, Clone, Default)]
pub enum Probe {
    /// Ready once the HTTP port accepts a TCP connection.
    #[default]
    Tcp,
    /// Ready once `GET <path>` on the HTTP port returns 2xx.
    Http { path: String },
}

/// A descriptor built at runtime.
#[derive(Debug, Clone)]
pub struct GenericImage {
    id: String,
    tag: String,
    http_port: u16,
    https_port: u16,
    env: Vec<String>,
    probe: Probe,
    http: reqwest::Client,
}

impl GenericImage {
    /// `tag` serving on `port` for both HTTP and HTTPS. The id defaults to
    /// the tag.
    pub fn new(tag: impl Into<String>, port: u16) -> Self {
        let tag = tag.into();
        Self {
            id: tag.clone(),
            tag,
            http_port: port,
            https_port: port,
            env: Vec::new(),
            probe: Probe::default(),
            http: probe_client(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_https_port(mut self, port: u16) -> Self {
        self.https_port = port;
        self
    }

    /// Add a `KEY=value` entry (or a `cmd=` override).
    pub fn with_env(mut self, var: impl Into<String>) -> Self {
        self.env.push(var.into());
        self
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    async fn tcp_check(&self, addr: &str) -> Result<(), ProbeError> {
        match tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ProbeError::Unhealthy(format!("connect to {addr} timed out"))),
        }
    }

    async fn http_check(&self, url: &str) -> Result<(), ProbeError> {
        let response = self.http.get(url).timeout(PROBE_TIMEOUT).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Unhealthy(format!("{url} returned {}", response.status())))
        }
    }
}

#[async_trait]
impl ImageDescriptor for GenericImage {
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

    async fn ping(&self, store: &InstanceStore) -> Result<(), ProbeError> {
        match &self.probe {
            Probe::Tcp => self.tcp_check(store.http_host()).await,
            Probe::Http { path } => {
                let url = format!("{}/{}", store.http_url(), path.trim_start_matches('/'));
                self.http_check(&url).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::engine::Resource;

    fn store_for(image: GenericImage, addr: &str) -> InstanceStore {
        let port = image.http_port();
        let resource = Resource {
            id: "local".to_string(),
            name: "local".to_string(),
            ports: HashMap::from([(format!("{port}/tcp"), addr.to_string())]),
        };
        let http = resource.endpoint("http", port).unwrap();
        let https = resource.endpoint("https", port).unwrap();
        InstanceStore::new(Arc::new(image), resource, http, https).0
    }

    #[test]
    fn test_builder() {
        let image = GenericImage::new("redis:7", 6379)
            .with_id("cache")
            .with_https_port(6380)
            .with_env("cmd=redis-server --appendonly no");
        assert_eq!(image.id(), "cache");
        assert_eq!(image.tag(), "redis:7");
        assert_eq!(image.http_port(), 6379);
        assert_eq!(image.https_port(), 6380);
        assert_eq!(image.env_vars(), vec!["cmd=redis-server --appendonly no"]);
    }

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let image = GenericImage::new("local", 6379);
        let store = store_for(image.clone(), &addr);
        assert!(image.ping(&store).await.is_ok());

        drop(listener);
        assert!(image.ping(&store).await.is_err());
    }

    #[tokio::test]
    async fn test_http_probe_checks_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let reply = if request.starts_with("GET /health ") {
                    "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                } else {
                    "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                };
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });

        let healthy = GenericImage::new("local", 8080).with_probe(Probe::Http {
            path: "/health".to_string(),
        });
        let store = store_for(healthy.clone(), &addr);
        assert!(healthy.ping(&store).await.is_ok());

        let unhealthy = GenericImage::new("local", 8080).with_probe(Probe::Http {
            path: "/ready".to_string(),
        });
        let err = unhealthy.ping(&store).await.unwrap_err();
        assert!(matches!(err, ProbeError::Unhealthy(_)));
    }
}
