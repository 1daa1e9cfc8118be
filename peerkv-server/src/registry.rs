//! # Service Registry
//!
//! Lease-based peer discovery. A node announces `<service>/<address>` with a
//! TTL lease and keeps it alive from a heartbeat task; when heartbeats stop,
//! the lease expires and the peer set converges within two TTLs.
//!
//! The `Registry` trait is the contract the server consumes; `LocalRegistry`
//! is the in-process implementation used for single-host clusters and tests.
//! Every background piece (heartbeat, lease sweeper, peer sync) is a thread
//! with an explicit stop signal and bounded shutdown latency, never a
//! detached task.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use peerkv_common::CacheResult;
use peerkv_engine::PeerRouter;

/// Default lease TTL for node announcements.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(5);

/// Interval between peer-sync stop-flag checks while the event channel is
/// quiet.
const PEER_SYNC_POLL: Duration = Duration::from_millis(100);

/// Membership change observed by registry subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A node's lease appeared.
    Joined(String),
    /// A node's lease was revoked or expired.
    Left(String),
}

/// Peer discovery contract consumed by the cache server.
pub trait Registry: Send + Sync {
    /// Announces a node under `<service>/<addr>` with a lease TTL.
    fn announce(&self, service: &str, addr: &str, ttl: Duration) -> CacheResult<()>;

    /// Extends a live lease. Returns false when the lease is gone.
    fn refresh(&self, service: &str, addr: &str) -> bool;

    /// Drops a lease immediately.
    fn revoke(&self, service: &str, addr: &str);

    /// Current live peer addresses for a service, sorted.
    fn peers(&self, service: &str) -> Vec<String>;

    /// Subscribes to membership changes for a service.
    fn subscribe(&self, service: &str) -> mpsc::Receiver<PeerEvent>;
}

/// Stop flag with a condvar so sleeping tasks wake promptly on stop.
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        StopSignal {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps up to `timeout`; returns true when stopped.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return true;
        }
        self.cond.wait_for(&mut stopped, timeout);
        *stopped
    }
}

/// Handle for a stoppable background task.
///
/// Dropping the handle stops the task and joins the thread.
pub struct TaskHandle {
    signal: Arc<StopSignal>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn new(signal: Arc<StopSignal>, join: JoinHandle<()>) -> Self {
        TaskHandle {
            signal,
            join: Some(join),
        }
    }

    /// Signals the task to stop and waits for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Lease {
    expires_at: Instant,
    ttl: Duration,
}

#[derive(Default)]
struct RegistryState {
    /// service -> addr -> lease.
    leases: HashMap<String, HashMap<String, Lease>>,
    /// service -> live subscriber channels.
    watchers: HashMap<String, Vec<mpsc::Sender<PeerEvent>>>,
}

impl RegistryState {
    fn notify(&mut self, service: &str, event: PeerEvent) {
        if let Some(watchers) = self.watchers.get_mut(service) {
            watchers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// In-process lease table implementing `Registry`.
#[derive(Default)]
pub struct LocalRegistry {
    state: Mutex<RegistryState>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        LocalRegistry::default()
    }

    /// Starts a background thread expiring stale leases every `interval`.
    ///
    /// Keep the interval at or below the lease TTL so departures are
    /// observed within two TTLs.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> TaskHandle {
        let interval = interval.max(Duration::from_millis(1));
        let signal = Arc::new(StopSignal::new());
        let task_signal = Arc::clone(&signal);
        let registry = Arc::clone(self);

        let join = std::thread::spawn(move || {
            while !task_signal.wait_timeout(interval) {
                registry.expire_stale(Instant::now());
            }
        });

        TaskHandle::new(signal, join)
    }

    /// Removes leases whose deadline passed, emitting `Left` events.
    pub fn expire_stale(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let mut departed = Vec::new();
        for (service, leases) in state.leases.iter_mut() {
            leases.retain(|addr, lease| {
                let live = lease.expires_at > now;
                if !live {
                    departed.push((service.clone(), addr.clone()));
                }
                live
            });
        }
        for (service, addr) in &departed {
            tracing::info!(key = %format!("{service}/{addr}"), "lease expired");
            state.notify(service, PeerEvent::Left(addr.clone()));
        }
        departed.len()
    }
}

impl Registry for LocalRegistry {
    fn announce(&self, service: &str, addr: &str, ttl: Duration) -> CacheResult<()> {
        let mut state = self.state.lock();
        let lease = Lease {
            expires_at: Instant::now() + ttl,
            ttl,
        };
        let fresh = state
            .leases
            .entry(service.to_string())
            .or_default()
            .insert(addr.to_string(), lease)
            .is_none();
        if fresh {
            tracing::info!(key = %format!("{service}/{addr}"), ?ttl, "service announced");
            state.notify(service, PeerEvent::Joined(addr.to_string()));
        }
        Ok(())
    }

    fn refresh(&self, service: &str, addr: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state
            .leases
            .get_mut(service)
            .and_then(|leases| leases.get_mut(addr))
        {
            Some(lease) if lease.expires_at > now => {
                lease.expires_at = now + lease.ttl;
                true
            }
            _ => false,
        }
    }

    fn revoke(&self, service: &str, addr: &str) {
        let mut state = self.state.lock();
        let removed = state
            .leases
            .get_mut(service)
            .and_then(|leases| leases.remove(addr))
            .is_some();
        if removed {
            tracing::info!(key = %format!("{service}/{addr}"), "service revoked");
            state.notify(service, PeerEvent::Left(addr.to_string()));
        }
    }

    fn peers(&self, service: &str) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock();
        let mut peers: Vec<String> = state
            .leases
            .get(service)
            .map(|leases| {
                leases
                    .iter()
                    .filter(|(_, lease)| lease.expires_at > now)
                    .map(|(addr, _)| addr.clone())
                    .collect()
            })
            .unwrap_or_default();
        peers.sort();
        peers
    }

    fn subscribe(&self, service: &str) -> mpsc::Receiver<PeerEvent> {
        let (tx, rx) = mpsc::channel();
        self.state
            .lock()
            .watchers
            .entry(service.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

/// Announces `<service>/<addr>` and keeps the lease alive from a background
/// thread until the handle is stopped, which revokes the lease.
pub fn spawn_heartbeat(
    registry: Arc<dyn Registry>,
    service: impl Into<String>,
    addr: impl Into<String>,
    ttl: Duration,
) -> CacheResult<TaskHandle> {
    let service = service.into();
    let addr = addr.into();
    registry.announce(&service, &addr, ttl)?;

    let period = (ttl / 2).max(Duration::from_millis(10));
    let signal = Arc::new(StopSignal::new());
    let task_signal = Arc::clone(&signal);

    let join = std::thread::spawn(move || {
        while !task_signal.wait_timeout(period) {
            if !registry.refresh(&service, &addr) {
                tracing::warn!(key = %format!("{service}/{addr}"), "lease lost, re-announcing");
                if registry.announce(&service, &addr, ttl).is_err() {
                    tracing::warn!(key = %format!("{service}/{addr}"), "re-announce failed");
                }
            }
        }
        registry.revoke(&service, &addr);
    });

    Ok(TaskHandle::new(signal, join))
}

/// Drives `PeerRouter::set_peers` from registry membership events.
///
/// The router is seeded with the current peer set immediately, then updated
/// on every join or leave.
pub fn spawn_peer_sync(
    registry: Arc<dyn Registry>,
    service: impl Into<String>,
    router: Arc<PeerRouter>,
) -> TaskHandle {
    let service = service.into();
    let events = registry.subscribe(&service);
    router.set_peers(registry.peers(&service));

    let signal = Arc::new(StopSignal::new());
    let task_signal = Arc::clone(&signal);

    let join = std::thread::spawn(move || loop {
        match events.recv_timeout(PEER_SYNC_POLL) {
            Ok(event) => {
                tracing::debug!(?event, service = %service, "peer membership changed");
                router.set_peers(registry.peers(&service));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if task_signal.is_stopped() {
            break;
        }
    });

    TaskHandle::new(signal, join)
}
