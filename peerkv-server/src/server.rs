//! # Cache Server
//!
//! Accept peer connections, parse fetch frames, and dispatch them to the
//! group directory with minimal overhead.
//!
//! Group lookups run blocking work (origin loads, peer fetches), so dispatch
//! hops to the blocking pool; the connection task itself only frames bytes.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use peerkv_common::protocol::{
    decode_fetch_request, encode_fetch_response, status_for, FetchRequest, STATUS_EXPIRED,
    STATUS_INTERNAL, STATUS_INVALID_ARGUMENT, STATUS_NOT_FOUND, STATUS_OK,
};
use peerkv_common::{valid_peer_addr, CacheError, CacheResult};
use peerkv_engine::GroupDirectory;

use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::{spawn_heartbeat, Registry, TaskHandle, DEFAULT_LEASE_TTL};

/// Default service name used for registry announcements.
pub const DEFAULT_SERVICE: &str = "peerkv";

#[derive(Default)]
struct Lifecycle {
    running: bool,
    shutdown: Option<watch::Sender<bool>>,
    heartbeat: Option<TaskHandle>,
}

/// TCP server exposing the peer fetch protocol for one group directory.
pub struct CacheServer {
    addr: String,
    service: String,
    lease_ttl: Duration,
    directory: Arc<GroupDirectory>,
    registry: Option<Arc<dyn Registry>>,
    metrics: Arc<Metrics>,
    lifecycle: Mutex<Lifecycle>,
}

impl CacheServer {
    /// Creates a server bound to `addr` (`host:port`, host `localhost` or a
    /// dotted quad).
    pub fn new(addr: impl Into<String>, directory: Arc<GroupDirectory>) -> CacheResult<Self> {
        let addr = addr.into();
        if !valid_peer_addr(&addr) {
            return Err(CacheError::InvalidArgument(format!(
                "invalid server address {addr}, expected host:port"
            )));
        }
        Ok(CacheServer {
            addr,
            service: DEFAULT_SERVICE.to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
            directory,
            registry: None,
            metrics: Arc::new(Metrics::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Attaches a registry; `serve` announces the node and heartbeats the
    /// lease until `stop`.
    pub fn with_registry(
        mut self,
        registry: Arc<dyn Registry>,
        service: impl Into<String>,
        lease_ttl: Duration,
    ) -> Self {
        self.registry = Some(registry);
        self.service = service.into();
        self.lease_ttl = lease_ttl;
        self
    }

    /// The address this server binds.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Point-in-time copy of the server's request metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Binds the listener and serves fetch requests until `stop`.
    ///
    /// In-flight connections drain naturally; only the accept loop stops.
    pub async fn serve(&self) -> CacheResult<()> {
        let mut shutdown_rx = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.running {
                return Err(CacheError::InvalidArgument(
                    "server already running".to_string(),
                ));
            }
            lifecycle.running = true;
            let (tx, rx) = watch::channel(false);
            lifecycle.shutdown = Some(tx);
            rx
        };

        let listener = match TcpListener::bind(&self.addr).await {
            Ok(listener) => listener,
            Err(err) => {
                self.teardown();
                return Err(err.into());
            }
        };

        if let Some(registry) = &self.registry {
            let heartbeat = match spawn_heartbeat(
                Arc::clone(registry),
                self.service.clone(),
                self.addr.clone(),
                self.lease_ttl,
            ) {
                Ok(heartbeat) => heartbeat,
                Err(err) => {
                    self.teardown();
                    return Err(err);
                }
            };
            self.lifecycle.lock().heartbeat = Some(heartbeat);
        }

        tracing::info!(addr = %self.addr, service = %self.service, "cache server listening");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            if *shutdown_rx.borrow_and_update() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "accepted connection");
                            let directory = Arc::clone(&self.directory);
                            let metrics = Arc::clone(&self.metrics);
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, directory, metrics).await {
                                    tracing::debug!(%peer, error = %err, "connection closed with error");
                                }
                            });
                        }
                        Err(err) => tracing::warn!(error = %err, "accept failed"),
                    }
                }
            }
        }

        self.teardown();
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            addr = %self.addr,
            requests = snapshot.requests_total,
            errors = snapshot.errors_total,
            "cache server stopped"
        );
        Ok(())
    }

    /// Signals the accept loop to stop. Idempotent.
    pub fn stop(&self) {
        let lifecycle = self.lifecycle.lock();
        if let Some(tx) = &lifecycle.shutdown {
            let _ = tx.send(true);
        }
    }

    /// Releases the lifecycle: heartbeat drop revokes the registry lease.
    fn teardown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.running = false;
        lifecycle.shutdown = None;
        lifecycle.heartbeat = None;
    }
}

/// Handles a single peer connection.
pub async fn handle_connection(
    stream: TcpStream,
    directory: Arc<GroupDirectory>,
    metrics: Arc<Metrics>,
) -> std::io::Result<()> {
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = Vec::with_capacity(1024);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match decode_fetch_request(&mut buffer) {
                Ok(Some(request)) => {
                    let started = Instant::now();
                    metrics.begin_request();
                    let (status, expire_nanos, value) = dispatch(request, &directory).await;
                    metrics.complete_request(started, status == STATUS_OK);

                    out.clear();
                    encode_fetch_response(status, expire_nanos, &value, &mut out);
                    stream.write_all(&out).await?;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "protocol error, closing connection");
                    out.clear();
                    encode_fetch_response(STATUS_INTERNAL, 0, err.to_string().as_bytes(), &mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Resolves the group and runs the lookup on the blocking pool.
async fn dispatch(request: FetchRequest, directory: &Arc<GroupDirectory>) -> (u8, i64, Vec<u8>) {
    if request.key.is_empty() {
        return (STATUS_INVALID_ARGUMENT, 0, b"key is required".to_vec());
    }

    let Some(group) = directory.get(&request.group) else {
        return (
            STATUS_NOT_FOUND,
            0,
            format!("group {} not found", request.group).into_bytes(),
        );
    };

    tracing::debug!(group = %request.group, key = %request.key, "fetch request");
    let key = request.key;
    let looked_up = tokio::task::spawn_blocking(move || group.get(&key)).await;

    match looked_up {
        Ok(Ok(view)) => {
            if view.is_expired(SystemTime::now()) {
                return (STATUS_EXPIRED, 0, b"value past its deadline".to_vec());
            }
            (STATUS_OK, view.expire_unix_nanos(), view.to_vec())
        }
        Ok(Err(err)) => (status_for(&err), 0, err.to_string().into_bytes()),
        Err(err) => {
            tracing::error!(error = %err, "lookup task failed");
            (STATUS_INTERNAL, 0, b"internal error".to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use peerkv_common::{ByteView, CacheError};

    use super::*;

    fn scores_directory() -> Arc<GroupDirectory> {
        let directory = Arc::new(GroupDirectory::new());
        directory.create_group("scores", 2048, |key: &str| match key {
            "Tom" => Ok(ByteView::new(b"630".as_slice())),
            _ => Err(CacheError::Origin(format!("{key} not exist"))),
        });
        directory
    }

    fn request(group: &str, key: &str) -> FetchRequest {
        FetchRequest {
            group: group.to_string(),
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn dispatch_serves_known_keys() {
        let directory = scores_directory();
        let (status, expire, value) = dispatch(request("scores", "Tom"), &directory).await;
        assert_eq!(status, STATUS_OK);
        assert_eq!(expire, 0);
        assert_eq!(value, b"630");
    }

    #[tokio::test]
    async fn dispatch_rejects_empty_keys() {
        let directory = scores_directory();
        let (status, _, _) = dispatch(request("scores", ""), &directory).await;
        assert_eq!(status, STATUS_INVALID_ARGUMENT);
    }

    #[tokio::test]
    async fn dispatch_reports_unknown_groups() {
        let directory = scores_directory();
        let (status, _, value) = dispatch(request("nope", "Tom"), &directory).await;
        assert_eq!(status, STATUS_NOT_FOUND);
        assert_eq!(value, b"group nope not found");
    }

    #[tokio::test]
    async fn dispatch_surfaces_origin_failures() {
        let directory = scores_directory();
        let (status, _, _) = dispatch(request("scores", "Unknown"), &directory).await;
        assert_eq!(status, peerkv_common::protocol::STATUS_ORIGIN_ERROR);
    }

    #[test]
    fn malformed_bind_address_is_rejected() {
        let directory = Arc::new(GroupDirectory::new());
        assert!(matches!(
            CacheServer::new("example.com:80", directory),
            Err(CacheError::InvalidArgument(_))
        ));
    }
}
