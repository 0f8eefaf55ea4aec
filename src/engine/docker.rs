//! Container engine backend over the Docker API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use uuid::Uuid;

use crate::engine::expiry::{ExpiryTimers, label_expired};
use crate::engine::{ContainerEngine, LABEL_EXPIRES_AT, LABEL_ID, Resource, RunSpec};
use crate::error::EngineError;

/// Host used when the engine reports a wildcard bind address.
const LOOPBACK: &str = "127.0.0.1";

/// [`ContainerEngine`] backed by a bollard Docker client.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    host_address: Option<String>,
    timers: ExpiryTimers,
}

impl DockerEngine {
    pub fn new(docker: Docker, host_address: Option<String>) -> Self {
        Self {
            docker,
            host_address,
            timers: ExpiryTimers::default(),
        }
    }

    /// Remove labelled containers whose expiration has passed.
    ///
    /// Covers containers leaked by a run that died before its timers fired.
    /// Returns the names of removed containers.
    pub async fn reap_expired(&self) -> Result<Vec<String>, EngineError> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![LABEL_EXPIRES_AT.to_string()],
        )]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::Unreachable {
                reason: e.to_string(),
            })?;

        let now = chrono::Utc::now();
        let mut reaped = Vec::new();
        for container in containers {
            if !label_expired(container.labels.as_ref(), now) {
                continue;
            }
            let Some(id) = container.id else { continue };
            let name = container
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());

            match self.remove(&id).await {
                Ok(()) => {
                    tracing::info!(container = %name, "Removed expired container");
                    reaped.push(name);
                }
                Err(e) => tracing::warn!(container = %name, "Could not remove expired container: {}", e),
            }
        }

        Ok(reaped)
    }

    /// Remove a container this engine gave up on before handing it out.
    async fn discard(&self, id: &str, name: &str) {
        if let Err(e) = self.remove(id).await {
            tracing::warn!(container = %name, error = %e, "Could not remove failed container");
        }
    }

    async fn pull_if_missing(&self, spec: &RunSpec) -> Result<(), EngineError> {
        let image = spec.image();
        if self.docker.inspect_image(&image).await.is_ok() {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: spec.repository.clone(),
            tag: spec.tag.clone(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(EngineError::ImagePull {
                        image,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), bollard::errors::Error> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unreachable {
                reason: e.to_string(),
            })
    }

    async fn run(&self, spec: &RunSpec) -> Result<Resource, EngineError> {
        self.pull_if_missing(spec).await?;

        let name = container_name(spec);

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            publish_all_ports: Some(true),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| EngineError::Create {
                image: spec.image(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&created.id, &name).await;
            return Err(EngineError::Start {
                name,
                reason: e.to_string(),
            });
        }

        // Host ports are only assigned once the container is running.
        let info = match self.docker.inspect_container(&created.id, None).await {
            Ok(info) => info,
            Err(e) => {
                self.discard(&created.id, &name).await;
                return Err(EngineError::Inspect {
                    name,
                    reason: e.to_string(),
                });
            }
        };

        let bindings = info
            .network_settings
            .and_then(|n| n.ports)
            .unwrap_or_default();

        tracing::debug!(container = %name, "Started container {}", created.id);

        Ok(Resource {
            id: created.id,
            name,
            ports: map_host_ports(&bindings, self.host_address.as_deref()),
        })
    }

    async fn expire(&self, resource: &Resource, ttl: Duration) -> Result<(), EngineError> {
        self.docker
            .inspect_container(&resource.id, None)
            .await
            .map_err(|e| EngineError::Expire {
                name: resource.name.clone(),
                reason: e.to_string(),
            })?;

        let engine = self.clone();
        let id = resource.id.clone();
        let name = resource.name.clone();
        self.timers.schedule(resource.id.clone(), ttl, async move {
            match engine.remove(&id).await {
                Ok(()) => tracing::warn!(container = %name, "Container expired after {:?}", ttl),
                Err(e) => tracing::debug!(container = %name, "Expiration found nothing to remove: {}", e),
            }
        });

        Ok(())
    }

    async fn purge(&self, resource: &Resource) -> Result<(), EngineError> {
        self.timers.cancel(&resource.id);
        match self.remove(&resource.id).await {
            Ok(()) => Ok(()),
            // Already gone through auto-remove or expiration.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(EngineError::Purge {
                name: resource.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Container name: `testrc-<id>-<random suffix>`.
fn container_name(spec: &RunSpec) -> String {
    let id = spec
        .labels
        .get(LABEL_ID)
        .map(String::as_str)
        .unwrap_or(spec.repository.as_str());
    let slug: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("testrc-{}-{}", slug, &suffix[..8])
}

/// Flatten engine port bindings into `"<port>/tcp"` to `"host:port"`.
///
/// IPv4 bindings win over IPv6 ones. Wildcard addresses are replaced with
/// `host_address`, or loopback when none is configured.
pub fn map_host_ports(
    bindings: &HashMap<String, Option<Vec<PortBinding>>>,
    host_address: Option<&str>,
) -> HashMap<String, String> {
    let mut mapped = HashMap::new();

    for (port, binds) in bindings {
        let Some(binds) = binds else { continue };
        let chosen = binds
            .iter()
            .filter(|b| b.host_port.as_deref().is_some_and(|p| !p.is_empty()))
            .min_by_key(|b| b.host_ip.as_deref().is_some_and(|ip| ip.contains(':')));
        let Some(binding) = chosen else { continue };

        let host = match binding.host_ip.as_deref() {
            None | Some("") | Some("0.0.0.0") | Some("::") => host_address.unwrap_or(LOOPBACK),
            Some(ip) => ip,
        };
        let host_port = binding.host_port.as_deref().unwrap_or_default();
        let address = if host.contains(':') {
            format!("[{host}]:{host_port}")
        } else {
            format!("{host}:{host_port}")
        };
        mapped.insert(port.clone(), address);
    }

    mapped
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bollard::API_DEFAULT_VERSION;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    type Route = fn(&str, &str) -> (u16, String);

    /// Minimal Docker API stand-in: one request per connection, routed on
    /// method and path. Returns the engine and a log of `"METHOD path"`.
    async fn fake_daemon(route: Route) -> (DockerEngine, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let seen = log.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move { serve(socket, route, seen).await });
            }
        });

        let docker =
            Docker::connect_with_http(&format!("http://{addr}"), 5, API_DEFAULT_VERSION).unwrap();
        (DockerEngine::new(docker, None), log)
    }

    async fn serve(mut socket: TcpStream, route: Route, seen: Arc<Mutex<Vec<String>>>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length")
                    .then(|| v.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let mut parts = head.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();
        let path = target.split('?').next().unwrap_or_default().to_string();
        seen.lock().unwrap().push(format!("{method} {path}"));

        let (status, body) = route(&method, &path);
        let reply = if status == 204 {
            "HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n".to_string()
        } else {
            format!(
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            )
        };
        let _ = socket.write_all(reply.as_bytes()).await;
        let _ = socket.shutdown().await;
    }

    fn deleted(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("DELETE "))
            .map(|line| line.rsplit('/').next().unwrap_or_default().to_string())
            .collect()
    }

    fn run_spec() -> RunSpec {
        RunSpec {
            repository: "redis".to_string(),
            tag: "7".to_string(),
            env: Vec::new(),
            cmd: Vec::new(),
            exposed_ports: vec![6379],
            auto_remove: true,
            labels: HashMap::from([(LABEL_ID.to_string(), "cache".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_inspect_failure_removes_started_container() {
        let (engine, log) = fake_daemon(|method, path| match (method, path) {
            ("GET", p) if p.contains("/images/") && p.ends_with("/json") => {
                (200, "{}".to_string())
            }
            ("POST", p) if p.ends_with("/containers/create") => {
                (201, r#"{"Id":"abc123","Warnings":[]}"#.to_string())
            }
            ("POST", p) if p.ends_with("/containers/abc123/start") => (204, String::new()),
            ("DELETE", p) if p.ends_with("/containers/abc123") => (204, String::new()),
            _ => (500, r#"{"message":"inspect exploded"}"#.to_string()),
        })
        .await;

        let err = engine.run(&run_spec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Inspect { .. }));
        assert_eq!(deleted(&log), vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_purge_cancels_expiry_timer() {
        let (engine, log) = fake_daemon(|method, path| match (method, path) {
            ("GET", p) if p.ends_with("/containers/abc123/json") => (200, "{}".to_string()),
            ("DELETE", _) => (204, String::new()),
            _ => (500, r#"{"message":"unexpected"}"#.to_string()),
        })
        .await;
        let resource = Resource {
            id: "abc123".to_string(),
            name: "testrc-cache-1".to_string(),
            ports: HashMap::new(),
        };

        engine
            .expire(&resource, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(engine.timers.pending(), 1);

        engine.purge(&resource).await.unwrap();
        assert_eq!(engine.timers.pending(), 0);

        // Only the purge removed it; the cancelled timer never fires.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(deleted(&log), vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_purge_of_missing_container_succeeds() {
        let (engine, _log) = fake_daemon(|_, _| {
            (404, r#"{"message":"No such container: gone"}"#.to_string())
        })
        .await;
        let resource = Resource {
            id: "gone".to_string(),
            name: "testrc-gone-1".to_string(),
            ports: HashMap::new(),
        };
        assert!(engine.purge(&resource).await.is_ok());
    }

    #[tokio::test]
    async fn test_reap_removes_only_expired_containers() {
        let (engine, log) = fake_daemon(|method, path| match (method, path) {
            ("GET", p) if p.ends_with("/containers/json") => {
                let now = chrono::Utc::now();
                let past = (now - chrono::Duration::seconds(30)).to_rfc3339();
                let future = (now + chrono::Duration::seconds(600)).to_rfc3339();
                let body = format!(
                    r#"[{{"Id":"old","Names":["/testrc-old-1"],"Labels":{{"{LABEL_EXPIRES_AT}":"{past}"}}}},{{"Id":"new","Names":["/testrc-new-1"],"Labels":{{"{LABEL_EXPIRES_AT}":"{future}"}}}}]"#
                );
                (200, body)
            }
            ("DELETE", _) => (204, String::new()),
            _ => (500, r#"{"message":"unexpected"}"#.to_string()),
        })
        .await;

        let reaped = engine.reap_expired().await.unwrap();
        assert_eq!(reaped, vec!["testrc-old-1".to_string()]);
        assert_eq!(deleted(&log), vec!["old".to_string()]);
    }

    fn binding(ip: &str, port: &str) -> PortBinding {
        PortBinding {
            host_ip: Some(ip.to_string()),
            host_port: Some(port.to_string()),
        }
    }

    #[test]
    fn test_wildcard_rewritten_to_loopback() {
        let bindings = HashMap::from([(
            "8000/tcp".to_string(),
            Some(vec![binding("0.0.0.0", "49155")]),
        )]);

        let mapped = map_host_ports(&bindings, None);
        assert_eq!(mapped.get("8000/tcp").map(String::as_str), Some("127.0.0.1:49155"));
    }

    #[test]
    fn test_ipv4_preferred_over_ipv6() {
        let bindings = HashMap::from([(
            "8000/tcp".to_string(),
            Some(vec![binding("::", "49156"), binding("0.0.0.0", "49155")]),
        )]);

        let mapped = map_host_ports(&bindings, Some("10.0.0.5"));
        assert_eq!(mapped.get("8000/tcp").map(String::as_str), Some("10.0.0.5:49155"));
    }

    #[test]
    fn test_specific_address_kept() {
        let bindings = HashMap::from([
            (
                "8000/tcp".to_string(),
                Some(vec![binding("192.168.1.4", "32001")]),
            ),
            ("9000/tcp".to_string(), None),
        ]);

        let mapped = map_host_ports(&bindings, None);
        assert_eq!(
            mapped,
            HashMap::from([("8000/tcp".to_string(), "192.168.1.4:32001".to_string())])
        );
    }

    #[test]
    fn test_container_name_is_sanitized() {
        let spec = RunSpec {
            repository: "amazon/dynamodb-local".to_string(),
            tag: "latest".to_string(),
            env: Vec::new(),
            cmd: Vec::new(),
            exposed_ports: vec![8000],
            auto_remove: true,
            labels: HashMap::from([(LABEL_ID.to_string(), "dynamo db".to_string())]),
        };
        let name = container_name(&spec);
        assert!(name.starts_with("testrc-dynamo-db-"));
        assert_eq!(name.len(), "testrc-dynamo-db-".len() + 8);
    }
}
