//! A private daemon booted when no local socket exists.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::error::DaemonError;

/// Lines kept per stream for replay.
const MAX_LOG_LINES: usize = 500;

/// Bounded capture of a daemon's stdout/stderr.
#[derive(Debug, Clone, Default)]
pub struct DaemonLogs {
    lines: Arc<Mutex<VecDeque<(&'static str, String)>>>,
}

impl DaemonLogs {
    fn push(&self, stream: &'static str, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == MAX_LOG_LINES {
            lines.pop_front();
        }
        lines.push_back((stream, line));
    }

    /// Captured lines, oldest first, as `(stream, line)`.
    pub fn snapshot(&self) -> Vec<(&'static str, String)> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Re-emit every captured line at warn level.
    pub fn replay(&self) {
        for (stream, line) in self.snapshot() {
            tracing::warn!(stream, "dockerd: {}", line);
        }
    }

    fn relay<R>(&self, stream: &'static str, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let logs = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(stream, "dockerd: {}", line);
                logs.push(stream, line);
            }
        });
    }
}

/// A daemon process owned by this test process.
///
/// The process is killed and its data directory removed on drop.
#[derive(Debug)]
pub struct SpawnedDaemon {
    child: Child,
    socket: PathBuf,
    logs: DaemonLogs,
    _data_dir: TempDir,
}

impl SpawnedDaemon {
    /// Start `binary` against a fresh temporary data directory.
    pub fn start(binary: &str) -> Result<Self, DaemonError> {
        let data_dir = tempfile::Builder::new().prefix("dockerd").tempdir()?;
        let root = data_dir.path();
        let socket = root.join("docker.sock");

        let mut child = Command::new(binary)
            .args(daemon_args(root, &socket))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DaemonError::SpawnFailed {
                binary: binary.to_string(),
                reason: e.to_string(),
            })?;

        let logs = DaemonLogs::default();
        if let Some(stdout) = child.stdout.take() {
            logs.relay("stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            logs.relay("stderr", stderr);
        }

        tracing::info!(
            pid = child.id(),
            data_dir = %root.display(),
            "Started private daemon"
        );

        Ok(Self {
            child,
            socket,
            logs,
            _data_dir: data_dir,
        })
    }

    /// Unix socket the daemon listens on.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn logs(&self) -> &DaemonLogs {
        &self.logs
    }

    /// Whether the process has already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Kill the process and wait for it to exit.
    pub async fn stop(&mut self) {
        if self.has_exited() {
            return;
        }
        match self.child.kill().await {
            Ok(()) => tracing::info!(pid = self.child.id(), "Stopped private daemon"),
            Err(e) => tracing::warn!("Could not stop private daemon: {}", e),
        }
    }
}

fn daemon_args(root: &Path, socket: &Path) -> Vec<String> {
    vec![
        format!("--data-root={}", root.join("root").display()),
        format!("--exec-root={}", root.join("exec").display()),
        format!("--pidfile={}", root.join("docker.pid").display()),
        format!("--host=unix://{}", socket.display()),
    ]
}
