//! Connection pool for media server transport connections
//!
//! Keeps two bounded sets of connections, one per flavor:
//!
//! - blocking connections, acquired with [`ConnectionPool::acquire_blocking`]
//!   which parks the calling thread while the pool is at capacity
//! - non-blocking connections, acquired with [`ConnectionPool::acquire`]
//!   which queues the calling task instead
//!
//! Both give up with `Error::ResourceExhausted` after the configured
//! acquisition timeout.
//!
//! # Leases
//!
//! Acquisition returns a [`PooledConnection`] lease. Dropping the lease
//! returns the connection, so every exit path (success, server error,
//! transport error, panic) releases exactly once. A lease that observed a
//! connection fault is marked broken and its connection is discarded on
//! return; a replacement is opened lazily by a later acquisition.
//!
//! # Example
//!
//! ```ignore
//! let pool = ConnectionPool::new(connector, &config);
//!
//! let mut conn = pool.acquire_blocking()?;
//! let reply = conn.call(&target, &Request::KeepAlive);
//! if let Err(e) = &reply {
//!     if e.is_connection_fault() {
//!         conn.mark_broken();
//!     }
//! }
//! drop(conn); // back to the pool (or discarded)
//! ```

use crate::config::MediaApiConfig;
use crate::transport::{AsyncMediaServerClient, MediaServerClient, MediaServerConnector};
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Leased blocking connection
pub type BlockingConnection = PooledConnection<Box<dyn MediaServerClient>>;

/// Leased non-blocking connection
pub type AsyncConnection = PooledConnection<Box<dyn AsyncMediaServerClient>>;

/// Counters for one pool flavor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Leases handed out
    pub acquired: u64,
    /// Leases returned
    pub released: u64,
    /// Connections opened
    pub created: u64,
    /// Connections dropped because they were broken
    pub discarded: u64,
    /// Connections currently idle
    pub idle: usize,
    /// Connections currently leased (or being opened)
    pub leased: usize,
}

impl PoolStats {
    fn merge(self, other: PoolStats) -> PoolStats {
        PoolStats {
            acquired: self.acquired + other.acquired,
            released: self.released + other.released,
            created: self.created + other.created,
            discarded: self.discarded + other.discarded,
            idle: self.idle + other.idle,
            leased: self.leased + other.leased,
        }
    }
}

/// Pool of transport connections to one media server
pub struct ConnectionPool {
    connector: Arc<dyn MediaServerConnector>,
    blocking: Arc<Slots<Box<dyn MediaServerClient>>>,
    non_blocking: Arc<Slots<Box<dyn AsyncMediaServerClient>>>,
}

impl ConnectionPool {
    /// Create a pool bounded by `config.max_connections` per flavor
    ///
    /// No connection is opened until the first acquisition.
    pub fn new(connector: Arc<dyn MediaServerConnector>, config: &MediaApiConfig) -> Self {
        let max = config.max_connections.max(1);
        let timeout = config.acquire_timeout();

        Self {
            connector,
            blocking: Arc::new(Slots::new("blocking", max, timeout)),
            non_blocking: Arc::new(Slots::new("non-blocking", max, timeout)),
        }
    }

    /// Lease a blocking connection, parking the thread while the pool is full
    ///
    /// # Errors
    ///
    /// * `Error::ResourceExhausted` - No connection freed up within the acquisition timeout
    /// * `Error::Transport` - Opening a new connection failed
    pub fn acquire_blocking(&self) -> Result<BlockingConnection> {
        match self.blocking.take_blocking()? {
            Slot::Idle(conn) => Ok(Slots::lease(&self.blocking, conn)),
            Slot::Open => {
                let reservation = Reservation(&self.blocking);
                match self.connector.connect_blocking() {
                    Ok(conn) => {
                        self.blocking.created.fetch_add(1, Ordering::Relaxed);
                        debug!("Opened new blocking media server connection");
                        Ok(reservation.fill(conn))
                    }
                    Err(e) => {
                        drop(reservation);
                        warn!("Failed to open blocking media server connection: {}", e);
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Lease a non-blocking connection, queueing the task while the pool is full
    ///
    /// # Errors
    ///
    /// * `Error::ResourceExhausted` - No connection freed up within the acquisition timeout
    /// * `Error::Transport` - Opening a new connection failed
    pub async fn acquire(&self) -> Result<AsyncConnection> {
        match self.non_blocking.take().await? {
            Slot::Idle(conn) => Ok(Slots::lease(&self.non_blocking, conn)),
            Slot::Open => {
                // Frees the slot if this future is dropped while connecting
                let reservation = Reservation(&self.non_blocking);
                match self.connector.connect().await {
                    Ok(conn) => {
                        self.non_blocking.created.fetch_add(1, Ordering::Relaxed);
                        debug!("Opened new non-blocking media server connection");
                        Ok(reservation.fill(conn))
                    }
                    Err(e) => {
                        drop(reservation);
                        warn!("Failed to open non-blocking media server connection: {}", e);
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Return a lease explicitly (equivalent to dropping it)
    pub fn release<C>(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    /// Combined counters of both flavors
    pub fn stats(&self) -> PoolStats {
        self.blocking_stats().merge(self.non_blocking_stats())
    }

    /// Counters of the blocking flavor
    pub fn blocking_stats(&self) -> PoolStats {
        self.blocking.stats()
    }

    /// Counters of the non-blocking flavor
    pub fn non_blocking_stats(&self) -> PoolStats {
        self.non_blocking.stats()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("blocking", &self.blocking.stats())
            .field("non_blocking", &self.non_blocking.stats())
            .finish()
    }
}

/// Outcome of waiting for a slot
enum Slot<C> {
    /// Reuse an idle connection
    Idle(C),
    /// A slot was reserved; the caller must open a connection for it
    Open,
}

struct SlotState<C> {
    idle: Vec<C>,
    /// Leased connections plus reservations still being opened
    leased: usize,
}

/// One bounded set of connections of a single flavor
struct Slots<C> {
    flavor: &'static str,
    max: usize,
    acquire_timeout: Duration,
    state: Mutex<SlotState<C>>,
    /// Wakes parked threads
    available: Condvar,
    /// Wakes queued tasks
    notify: Notify,
    acquired: AtomicU64,
    released: AtomicU64,
    created: AtomicU64,
    discarded: AtomicU64,
}

impl<C> Slots<C> {
    fn new(flavor: &'static str, max: usize, acquire_timeout: Duration) -> Self {
        Self {
            flavor,
            max,
            acquire_timeout,
            state: Mutex::new(SlotState {
                idle: Vec::new(),
                leased: 0,
            }),
            available: Condvar::new(),
            notify: Notify::new(),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    fn try_take(state: &mut SlotState<C>, max: usize) -> Option<Slot<C>> {
        if let Some(conn) = state.idle.pop() {
            state.leased += 1;
            return Some(Slot::Idle(conn));
        }
        if state.leased + state.idle.len() < max {
            state.leased += 1;
            return Some(Slot::Open);
        }
        None
    }

    fn exhausted(&self) -> Error {
        Error::ResourceExhausted(format!(
            "no {} connection available after {}ms (max {})",
            self.flavor,
            self.acquire_timeout.as_millis(),
            self.max
        ))
    }

    fn take_blocking(&self) -> Result<Slot<C>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            if let Some(slot) = Self::try_take(&mut state, self.max) {
                return Ok(slot);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return match Self::try_take(&mut state, self.max) {
                    Some(slot) => Ok(slot),
                    None => {
                        warn!("{} connection pool exhausted", self.flavor);
                        Err(self.exhausted())
                    }
                };
            }
        }
    }

    async fn take(&self) -> Result<Slot<C>> {
        let deadline = tokio::time::Instant::now() + self.acquire_timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release between check and await is not missed
            notified.as_mut().enable();

            let slot = {
                let mut state = self.state.lock();
                Self::try_take(&mut state, self.max)
            };
            if let Some(slot) = slot {
                return Ok(slot);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("{} connection pool exhausted", self.flavor);
                return Err(self.exhausted());
            }
        }
    }

    fn lease(slots: &Arc<Self>, conn: C) -> PooledConnection<C> {
        slots.acquired.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            conn: Some(conn),
            slots: Arc::clone(slots),
            broken: false,
        }
    }

    /// Give up a reservation whose connection was never opened
    fn cancel_open(&self) {
        self.state.lock().leased -= 1;
        self.wake();
    }

    fn give_back(&self, conn: Option<C>, broken: bool) {
        {
            let mut state = self.state.lock();
            state.leased -= 1;
            match conn {
                Some(conn) if !broken => state.idle.push(conn),
                _ => {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.released.fetch_add(1, Ordering::Relaxed);
        if broken {
            warn!("Discarded broken {} media server connection", self.flavor);
        }
        self.wake();
    }

    fn wake(&self) {
        self.available.notify_one();
        self.notify.notify_one();
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: state.idle.len(),
            leased: state.leased,
        }
    }
}

/// Slot reserved by [`Slot::Open`]; given back on drop unless filled
struct Reservation<'a, C>(&'a Arc<Slots<C>>);

impl<C> Reservation<'_, C> {
    fn fill(self, conn: C) -> PooledConnection<C> {
        let slots = self.0;
        std::mem::forget(self);
        Slots::lease(slots, conn)
    }
}

impl<C> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        self.0.cancel_open();
    }
}

/// Leased connection; returns to its pool when dropped
pub struct PooledConnection<C> {
    conn: Option<C>,
    slots: Arc<Slots<C>>,
    broken: bool,
}

impl<C> PooledConnection<C> {
    /// Discard the connection instead of reusing it when the lease ends
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether the lease has been marked broken
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("flavor", &self.slots.flavor)
            .field("broken", &self.broken)
            .finish()
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only taken in Drop
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.slots.give_back(self.conn.take(), self.broken);
    }
}
