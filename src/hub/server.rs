//! Hub server - the single writer
//!
//! Holds the hub lock and the only writable handle while it runs, and serves
//! JSON-line requests on a loopback TCP port advertised in the marker file.

use super::protocol::{HubReply, HubRequest, WireError, dispatch};
use super::store::CentralHub;
use super::HubPaths;
use crate::lock::{LockManager, LockOptions, SeedLock};
use crate::storage::atomic::write_atomic;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type SharedHub = Arc<Mutex<CentralHub>>;

/// Liveness marker written by a running server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMarker {
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub version: String,
}

impl ServerMarker {
    pub fn new(port: u16) -> Self {
        Self {
            pid: std::process::id(),
            port,
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::corrupt(path, format!("invalid hub server marker: {}", e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }
}

#[derive(Debug, Clone)]
pub struct HubServerOptions {
    /// 0 picks a free port
    pub port: u16,
    pub lock: LockOptions,
}

impl Default for HubServerOptions {
    fn default() -> Self {
        Self {
            port: 0,
            lock: LockOptions::default().with_holder("hub-server"),
        }
    }
}

impl HubServerOptions {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// A running hub server
pub struct HubServer {
    paths: HubPaths,
    addr: SocketAddr,
    marker: ServerMarker,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    lock: Option<SeedLock>,
}

impl HubServer {
    /// Take the hub lock, open the hub and start serving
    pub async fn start(workspace: impl Into<PathBuf>, options: HubServerOptions) -> Result<Self> {
        let paths = HubPaths::new(workspace);
        let lock = LockManager::acquire(&paths.lock_target(), &options.lock)?;
        let hub = CentralHub::open_writable(&paths.hub_db())?;

        let listener = TcpListener::bind(("127.0.0.1", options.port)).await?;
        let addr = listener.local_addr()?;
        let marker = ServerMarker::new(addr.port());
        marker.write(&paths.marker())?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, Arc::new(Mutex::new(hub)), shutdown_rx));

        tracing::info!(pid = marker.pid, %addr, "Hub server started");
        Ok(Self {
            paths,
            addr,
            marker,
            shutdown: Some(shutdown),
            task: Some(task),
            lock: Some(lock),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn marker(&self) -> &ServerMarker {
        &self.marker
    }

    /// Serve until `signal` resolves, then shut down
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) -> Result<()> {
        signal.await;
        self.shutdown().await
    }

    /// Stop accepting, remove the marker and release the hub lock
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Hub server task ended abnormally: {}", e);
            }
        }
        self.remove_marker();
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        tracing::info!(pid = self.marker.pid, "Hub server stopped");
        Ok(())
    }

    /// Remove the marker if it is still ours
    fn remove_marker(&self) {
        let path = self.paths.marker();
        match ServerMarker::read(&path) {
            Ok(Some(marker)) if marker == self.marker => {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("Failed to remove hub server marker {}: {}", path.display(), e);
                }
            }
            _ => {}
        }
    }
}

impl Drop for HubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
            if let Some(task) = self.task.take() {
                task.abort();
            }
            self.remove_marker();
        }
    }
}

async fn accept_loop(listener: TcpListener, hub: SharedHub, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let hub = hub.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, hub).await {
                            tracing::debug!(%peer, "Hub connection closed: {}", e);
                        }
                    });
                }
                Err(e) => tracing::warn!("Hub server accept failed: {}", e),
            },
        }
    }
}

async fn serve_connection(stream: TcpStream, hub: SharedHub) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<HubRequest>(&line) {
            Ok(request) => {
                tracing::debug!(op = request.op(), "Serving hub request");
                HubReply::from_result(execute(hub.clone(), request).await)
            }
            Err(e) => HubReply::Error(WireError::from(&Error::Validation(format!(
                "malformed hub request: {}",
                e
            )))),
        };

        let mut out = serde_json::to_vec(&reply).map_err(std::io::Error::other)?;
        out.push(b'\n');
        write.write_all(&out).await?;
    }
    Ok(())
}

/// Requests are executed one at a time against the single handle
async fn execute(hub: SharedHub, request: HubRequest) -> Result<serde_json::Value> {
    tokio::task::spawn_blocking(move || {
        let hub = hub
            .lock()
            .map_err(|_| Error::Ipc("hub handle poisoned by an earlier panic".to_string()))?;
        dispatch(&hub, request)
    })
    .await
    .unwrap_or_else(|e| Err(Error::Ipc(format!("hub worker failed: {}", e))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::init;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_marker_lifecycle() {
        let dir = TempDir::new().unwrap();
        init(dir.path()).unwrap();
        let paths = HubPaths::new(dir.path());

        let server = HubServer::start(dir.path(), HubServerOptions::default()).await.unwrap();
        let marker = ServerMarker::read(&paths.marker()).unwrap().unwrap();
        assert_eq!(marker.pid, std::process::id());
        assert_eq!(marker.port, server.local_addr().port());
        assert!(paths.lock_file().exists());

        // a second server cannot start while the first holds the lock
        let second = HubServer::start(dir.path(), HubServerOptions::default()).await;
        assert!(matches!(second, Err(Error::Locked { .. })));

        server.shutdown().await.unwrap();
        assert!(!paths.marker().exists());
        assert!(!paths.lock_file().exists());
    }

    #[tokio::test]
    async fn test_serves_json_lines() {
        let dir = TempDir::new().unwrap();
        init(dir.path()).unwrap();
        let server = HubServer::start(dir.path(), HubServerOptions::default()).await.unwrap();

        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"{\"op\":\"status\"}\nnot json\n").await.unwrap();
        let status: HubReply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(status.into_result().unwrap()["repos_active"], 0);

        let bad: HubReply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(bad.into_result(), Err(Error::Validation(_))));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_without_hub() {
        let dir = TempDir::new().unwrap();
        let result = HubServer::start(dir.path(), HubServerOptions::default()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!HubPaths::new(dir.path()).lock_file().exists());
    }
}
