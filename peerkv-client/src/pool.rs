//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to one peer to keep fetch latency at a
//! single round trip after warmup.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Drop on Failure**: A connection that saw an IO or framing error is
//!    never returned to the pool.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerkv_common::protocol::{encode_fetch_request, read_fetch_response, FetchResponse};
use peerkv_common::{CacheError, CacheResult};

/// Pool configuration for one peer address.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Peer address, e.g. "127.0.0.1:6324".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout; this is the per-fetch deadline.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool for the configured peer.
    pub fn new(config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Acquires an idle connection or dials a new one within the total cap.
    pub fn acquire(&self) -> CacheResult<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(Arc::clone(&self.inner), conn));
        }

        if !self.try_reserve() {
            return Err(CacheError::PeerUnavailable(format!(
                "connection pool to {} exhausted",
                self.inner.config.addr
            )));
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => Ok(PooledConnection::new(Arc::clone(&self.inner), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII wrapper returning a healthy connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Runs one fetch round trip on this connection.
    pub fn fetch(&mut self, group: &str, key: &str) -> CacheResult<FetchResponse> {
        let conn = self.conn.as_mut().expect("connection exists");
        let response = conn.fetch(group, key);
        if response.is_err() {
            // An IO or framing failure leaves the stream in an unknown
            // state; never hand it back to the pool.
            self.valid = false;
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: Arc::clone(&self.pool),
        };

        if self.valid {
            pool.return_connection(conn);
        } else {
            pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> CacheResult<Self> {
        let stream = connect_stream(config)?;
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn fetch(&mut self, group: &str, key: &str) -> CacheResult<FetchResponse> {
        self.write_buf.clear();
        encode_fetch_request(group, key, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_fetch_response(&mut self.reader)
    }
}

fn connect_stream(config: &PoolConfig) -> CacheResult<TcpStream> {
    let addr = config
        .addr
        .to_socket_addrs()
        .map_err(|err| CacheError::PeerUnavailable(format!("resolve {}: {err}", config.addr)))?
        .next()
        .ok_or_else(|| {
            CacheError::PeerUnavailable(format!("{} resolves to no address", config.addr))
        })?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    }
    .map_err(|err| CacheError::PeerUnavailable(format!("dial {}: {err}", config.addr)))?;
    Ok(stream)
}
