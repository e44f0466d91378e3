//! Connection pool for HTTP/1.1 reuse and HTTP/2 / HTTP/3 multiplexing.
//!
//! - HTTP/1.1: exclusive leases. A per-host semaphore caps open connections;
//!   idle connections wait in a list until reused or expired.
//! - HTTP/2 and HTTP/3: shared connections. Each carries a stream semaphore
//!   sized to the per-connection stream cap; a lease holds one permit.
//!   New shared connections are opened one at a time per key behind a
//!   [`ConnectGate`], so a burst of cold requests shares one handshake.
//!
//! A periodic sweep drops expired idle connections and empty buckets.
//!
//! Locks are std mutexes held only for short bookkeeping, never across `.await`.
//! Dropping a lease without releasing it evicts the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{Notify, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::transport::h1::H1Connection;
use crate::transport::h2::H2Connection;
use crate::transport::h3::H3Handle;
use crate::version::HttpVersion;

/// Bounds on how often the sweep runs.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Connection pool key identifying a unique host/port/protocol combination
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub is_https: bool,
    pub version: HttpVersion,
}

impl PoolKey {
    /// Create a new pool key
    pub fn new(host: impl Into<String>, port: u16, is_https: bool, version: HttpVersion) -> Self {
        Self {
            host: host.into(),
            port,
            is_https,
            version,
        }
    }

    /// Same target, different protocol bucket.
    pub fn with_version(&self, version: HttpVersion) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }
}

/// Pool limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle connections older than this are discarded.
    pub idle_timeout: Duration,
    /// Open HTTP/1.1 connections per host.
    pub max_connections_per_host: usize,
    /// Physical HTTP/2 or HTTP/3 connections per host.
    pub max_multiplexed_per_host: usize,
    /// Concurrent streams per multiplexed connection.
    pub max_streams_per_connection: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            max_connections_per_host: 6,
            max_multiplexed_per_host: 1,
            max_streams_per_connection: 100,
        }
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub active_streams: usize,
    pub http2_connections: usize,
    pub http3_connections: usize,
    pub http1_idle_connections: usize,
}

/// Handle to a multiplexed connection.
#[derive(Debug, Clone)]
pub enum SharedHandle {
    H2(H2Connection),
    H3(H3Handle),
}

impl SharedHandle {
    pub fn is_alive(&self) -> bool {
        match self {
            Self::H2(c) => c.is_alive(),
            Self::H3(h) => h.is_alive(),
        }
    }

    pub fn version(&self) -> HttpVersion {
        match self {
            Self::H2(_) => HttpVersion::Http2,
            Self::H3(_) => HttpVersion::Http3,
        }
    }
}

struct SharedConn {
    id: u64,
    handle: SharedHandle,
    streams: Arc<Semaphore>,
    /// Touched whenever a stream on this connection finishes.
    last_used: Arc<Mutex<Instant>>,
}

impl SharedConn {
    fn is_idle_expired(&self, max_streams: usize, max_idle: Duration) -> bool {
        self.streams.available_permits() >= max_streams && lock(&self.last_used).elapsed() >= max_idle
    }
}

struct IdleConn {
    conn: H1Connection,
    last_used: Instant,
}

impl IdleConn {
    fn is_expired(&self, max_idle: Duration) -> bool {
        self.last_used.elapsed() >= max_idle
    }
}

/// Per-key state. Each bucket has its own locks so hosts never contend.
struct Bucket {
    h1_slots: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConn>>,
    shared: Mutex<Vec<SharedConn>>,
    /// Held by whoever is opening a shared connection for this key.
    connecting: Arc<tokio::sync::Mutex<()>>,
    /// Set once the host answered ALPN with HTTP/1.1.
    http1_only: AtomicBool,
    /// Woken when a shared stream frees up or a shared connection goes away.
    freed: Notify,
}

impl Bucket {
    fn new(max_connections: usize) -> Self {
        Self {
            h1_slots: Arc::new(Semaphore::new(max_connections)),
            idle: Mutex::new(Vec::new()),
            shared: Mutex::new(Vec::new()),
            connecting: Arc::new(tokio::sync::Mutex::new(())),
            http1_only: AtomicBool::new(false),
            freed: Notify::new(),
        }
    }

    fn is_empty(&self, max_connections: usize) -> bool {
        lock(&self.idle).is_empty()
            && lock(&self.shared).is_empty()
            && self.h1_slots.available_permits() >= max_connections
            && self.connecting.try_lock().is_ok()
    }
}

/// What a bucket can offer a request for a shared stream right now.
enum SharedAttempt {
    Leased(SharedLease),
    Open,
    Full,
}

struct PoolInner {
    config: PoolConfig,
    buckets: Mutex<HashMap<PoolKey, Arc<Bucket>>>,
    next_id: AtomicU64,
    last_cleanup: Mutex<Instant>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection pool for reusing HTTP/1.1, HTTP/2, and HTTP/3 connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// Outcome of asking for an HTTP/1.1 connection.
pub enum H1Slot {
    /// A pooled connection that passed the liveness check.
    Idle(H1Lease),
    /// A free slot: the caller should connect and [`ConnectSlot::attach`].
    Connect(ConnectSlot),
}

/// Permission to open one new connection for a key.
pub struct ConnectSlot {
    permit: OwnedSemaphorePermit,
    key: PoolKey,
    pool: ConnectionPool,
}

impl ConnectSlot {
    pub fn attach(self, conn: H1Connection) -> H1Lease {
        H1Lease {
            conn,
            _permit: self.permit,
            key: self.key,
            pool: self.pool,
        }
    }
}

/// Exclusive right to open a shared connection for a key.
pub struct ConnectGate {
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for ConnectGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnectGate")
    }
}

/// Exclusive lease on an HTTP/1.1 connection.
pub struct H1Lease {
    conn: H1Connection,
    _permit: OwnedSemaphorePermit,
    key: PoolKey,
    pool: ConnectionPool,
}

impl std::fmt::Debug for H1Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H1Lease").field("key", &self.key).finish()
    }
}

impl H1Lease {
    pub fn conn(&mut self) -> &mut H1Connection {
        &mut self.conn
    }

    /// Return the connection to the idle list.
    pub fn release(self) {
        let Self {
            conn,
            _permit,
            key,
            pool,
        } = self;
        if conn.should_close() {
            tracing::debug!("H1 Pool: Closing connection for {:?} (server requested close)", key);
            return;
        }
        pool.put_h1(&key, conn);
    }

    /// Drop the connection instead of reusing it.
    pub fn evict(self) {
        tracing::debug!("H1 Pool: Evicting connection for {:?}", self.key);
    }
}

/// One stream slot on a shared HTTP/2 or HTTP/3 connection.
pub struct SharedLease {
    handle: SharedHandle,
    conn_id: u64,
    permit: Option<OwnedSemaphorePermit>,
    last_used: Arc<Mutex<Instant>>,
    key: PoolKey,
    bucket: Arc<Bucket>,
}

impl std::fmt::Debug for SharedLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLease")
            .field("key", &self.key)
            .field("conn_id", &self.conn_id)
            .finish()
    }
}

impl SharedLease {
    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    /// Remove the connection from the pool; in-flight streams on it finish
    /// on their own, new requests open a fresh connection.
    pub fn evict(self) {
        tracing::debug!(
            "H2/H3 Pool: Evicting connection {} for {:?}",
            self.conn_id,
            self.key
        );
        remove_shared(&self.bucket, self.conn_id);
    }
}

impl Drop for SharedLease {
    fn drop(&mut self) {
        *lock(&self.last_used) = Instant::now();
        // Release before waking so waiters find the permit.
        drop(self.permit.take());
        self.bucket.freed.notify_waiters();
    }
}

fn remove_shared(bucket: &Bucket, conn_id: u64) {
    lock(&bucket.shared).retain(|c| {
        if c.id == conn_id {
            c.streams.close();
            false
        } else {
            true
        }
    });
    bucket.freed.notify_waiters();
}

impl ConnectionPool {
    /// Create a pool. Inside a tokio runtime this also starts the
    /// background sweep; elsewhere the sweep runs as the pool is used.
    pub fn new(config: PoolConfig) -> Self {
        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                buckets: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                last_cleanup: Mutex::new(Instant::now()),
            }),
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            pool.spawn_cleanup_task(&runtime);
        }
        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn bucket(&self, key: &PoolKey) -> Arc<Bucket> {
        self.maybe_cleanup();
        let mut buckets = lock(&self.inner.buckets);
        buckets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Bucket::new(self.inner.config.max_connections_per_host)))
            .clone()
    }

    /// Get an HTTP/1.1 connection slot, waiting up to `pool_timeout` when
    /// the host is at its connection cap.
    pub async fn acquire_h1(&self, key: &PoolKey, pool_timeout: Option<Duration>) -> Result<H1Slot> {
        let bucket = self.bucket(key);
        let acquire = bucket.h1_slots.clone().acquire_owned();
        let permit = within_pool_timeout(pool_timeout, acquire)
            .await?
            .map_err(|_| Error::local_protocol("connection pool closed"))?;

        loop {
            let candidate = lock(&bucket.idle).pop();
            let Some(mut idle) = candidate else {
                tracing::debug!("H1 Pool: No reusable connection for {:?}", key);
                return Ok(H1Slot::Connect(ConnectSlot {
                    permit,
                    key: key.clone(),
                    pool: self.clone(),
                }));
            };
            if idle.is_expired(self.inner.config.idle_timeout) {
                tracing::debug!(
                    "H1 Pool: Connection expired for {:?} (age: {:?})",
                    key,
                    idle.last_used.elapsed()
                );
                continue;
            }
            if !idle.conn.is_alive().await {
                tracing::debug!("H1 Pool: Discarding dead connection for {:?}", key);
                continue;
            }
            tracing::debug!("H1 Pool: Reusing connection for {:?}", key);
            return Ok(H1Slot::Idle(H1Lease {
                conn: idle.conn,
                _permit: permit,
                key: key.clone(),
                pool: self.clone(),
            }));
        }
    }

    fn put_h1(&self, key: &PoolKey, conn: H1Connection) {
        let bucket = self.bucket(key);
        let mut idle = lock(&bucket.idle);
        idle.push(IdleConn {
            conn,
            last_used: Instant::now(),
        });
        tracing::debug!(
            "H1 Pool: Returned connection for {:?} (idle: {})",
            key,
            idle.len()
        );
    }

    /// Lease a stream on an existing multiplexed connection.
    ///
    /// Returns `Ok(None)` when the caller should open a new connection:
    /// none exist yet, or all are full and the host is below its cap.
    /// At the cap, waits up to `pool_timeout` for a stream to free up on
    /// any of the host's connections.
    pub async fn lease_shared(
        &self,
        key: &PoolKey,
        pool_timeout: Option<Duration>,
    ) -> Result<Option<SharedLease>> {
        let bucket = self.bucket(key);
        within_pool_timeout(pool_timeout, self.wait_for_stream(key, &bucket)).await
    }

    async fn wait_for_stream(&self, key: &PoolKey, bucket: &Arc<Bucket>) -> Option<SharedLease> {
        let mut waiting = false;
        loop {
            // Registered before looking so a stream freed in between still wakes us.
            let freed = bucket.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            match self.try_shared(key, bucket) {
                SharedAttempt::Leased(lease) => return Some(lease),
                SharedAttempt::Open => return None,
                SharedAttempt::Full => {
                    if !waiting {
                        tracing::debug!("H2/H3 Pool: Waiting for a free stream on {:?}", key);
                        waiting = true;
                    }
                    freed.await;
                }
            }
        }
    }

    fn try_shared(&self, key: &PoolKey, bucket: &Arc<Bucket>) -> SharedAttempt {
        let mut shared = lock(&bucket.shared);
        shared.retain(|c| {
            let alive = c.handle.is_alive();
            if !alive {
                tracing::debug!("H2/H3 Pool: Dropping dead connection {} for {:?}", c.id, key);
                c.streams.close();
            }
            alive
        });

        for conn in shared.iter() {
            if let Ok(permit) = conn.streams.clone().try_acquire_owned() {
                tracing::debug!(
                    "H2/H3 Pool: Reusing connection {} for {:?} (free streams: {})",
                    conn.id,
                    key,
                    conn.streams.available_permits()
                );
                return SharedAttempt::Leased(SharedLease {
                    handle: conn.handle.clone(),
                    conn_id: conn.id,
                    permit: Some(permit),
                    last_used: conn.last_used.clone(),
                    key: key.clone(),
                    bucket: bucket.clone(),
                });
            }
        }

        if shared.is_empty() {
            tracing::debug!("H2/H3 Pool: No existing connection for {:?}", key);
            SharedAttempt::Open
        } else if shared.len() < self.inner.config.max_multiplexed_per_host {
            tracing::debug!("H2/H3 Pool: All connections full for {:?}, opening another", key);
            SharedAttempt::Open
        } else {
            SharedAttempt::Full
        }
    }

    /// Take the right to open a shared connection for `key`, waiting up to
    /// `pool_timeout` while another request holds it. Callers should try
    /// [`lease_shared`](Self::lease_shared) again once they hold the gate.
    ///
    /// Returns `Ok(None)` for hosts known to negotiate HTTP/1.1, whose
    /// connects need no serializing.
    pub async fn connect_gate(
        &self,
        key: &PoolKey,
        pool_timeout: Option<Duration>,
    ) -> Result<Option<ConnectGate>> {
        let bucket = self.bucket(key);
        if bucket.http1_only.load(Ordering::Acquire) {
            return Ok(None);
        }
        let guard = within_pool_timeout(pool_timeout, bucket.connecting.clone().lock_owned()).await?;
        if bucket.http1_only.load(Ordering::Acquire) {
            return Ok(None);
        }
        Ok(Some(ConnectGate { _guard: guard }))
    }

    /// Remember that `key`'s host picked HTTP/1.1 during ALPN.
    pub fn mark_http1_only(&self, key: &PoolKey) {
        let bucket = self.bucket(key);
        if !bucket.http1_only.swap(true, Ordering::AcqRel) {
            tracing::debug!("H2/H3 Pool: {:?} negotiated HTTP/1.1", key);
        }
    }

    /// Add a freshly established multiplexed connection and lease its first
    /// stream. At the per-host cap the connection serves this one request
    /// and is not pooled.
    pub fn register_shared(&self, key: &PoolKey, handle: SharedHandle) -> Result<SharedLease> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let streams = Arc::new(Semaphore::new(
            self.inner.config.max_streams_per_connection.max(1),
        ));
        let permit = streams
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::local_protocol("new connection has no free streams"))?;
        let last_used = Arc::new(Mutex::new(Instant::now()));

        let bucket = self.bucket(key);
        bucket.http1_only.store(false, Ordering::Release);
        let mut shared = lock(&bucket.shared);
        if shared.len() >= self.inner.config.max_multiplexed_per_host.max(1) {
            tracing::debug!(
                "H2/H3 Pool: {:?} at {} connections, connection {} not pooled",
                key,
                shared.len(),
                id
            );
        } else {
            shared.push(SharedConn {
                id,
                handle: handle.clone(),
                streams,
                last_used: last_used.clone(),
            });
            tracing::debug!(
                "H2/H3 Pool: Registered connection {} for {:?} (connections: {})",
                id,
                key,
                shared.len()
            );
        }
        drop(shared);
        Ok(SharedLease {
            handle,
            conn_id: id,
            permit: Some(permit),
            last_used,
            key: key.clone(),
            bucket,
        })
    }

    /// Drop expired idle HTTP/1.1 connections, shared connections that are
    /// dead or have sat without streams past the idle timeout, and buckets
    /// nothing refers to anymore.
    pub fn cleanup(&self) {
        let config = &self.inner.config;
        let max_streams = config.max_streams_per_connection.max(1);
        let mut buckets = lock(&self.inner.buckets);
        let before = buckets.len();
        buckets.retain(|key, bucket| {
            lock(&bucket.idle).retain(|c| !c.is_expired(config.idle_timeout));

            let mut removed = false;
            lock(&bucket.shared).retain(|c| {
                let keep = c.handle.is_alive() && !c.is_idle_expired(max_streams, config.idle_timeout);
                if !keep {
                    tracing::debug!("H2/H3 Pool: Closing idle connection {} for {:?}", c.id, key);
                    c.streams.close();
                    removed = true;
                }
                keep
            });
            if removed {
                bucket.freed.notify_waiters();
            }

            // A bucket someone still holds keeps its semaphores alive.
            Arc::strong_count(bucket) > 1 || !bucket.is_empty(config.max_connections_per_host)
        });
        if buckets.len() != before {
            tracing::trace!("Pool: Swept {} empty buckets", before - buckets.len());
        }
        drop(buckets);
        *lock(&self.inner.last_cleanup) = Instant::now();
    }

    fn cleanup_interval(&self) -> Duration {
        self.inner
            .config
            .idle_timeout
            .clamp(MIN_CLEANUP_INTERVAL, MAX_CLEANUP_INTERVAL)
    }

    fn maybe_cleanup(&self) {
        let due = lock(&self.inner.last_cleanup).elapsed() >= self.cleanup_interval();
        if due {
            self.cleanup();
        }
    }

    /// Run [`cleanup`](Self::cleanup) periodically until the pool is dropped.
    fn spawn_cleanup_task(&self, runtime: &tokio::runtime::Handle) {
        let inner: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let period = self.cleanup_interval();
        runtime.spawn(async move {
            let mut interval_timer = tokio::time::interval(period);
            interval_timer.tick().await;
            loop {
                interval_timer.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                ConnectionPool { inner }.cleanup();
            }
        });
    }

    /// Drop every idle and shared connection.
    pub fn clear(&self) {
        let buckets: Vec<Arc<Bucket>> = lock(&self.inner.buckets).values().cloned().collect();
        for bucket in buckets {
            lock(&bucket.idle).clear();
            for conn in lock(&bucket.shared).drain(..) {
                conn.streams.close();
            }
            bucket.freed.notify_waiters();
        }
    }

    /// Get current pool statistics (for debugging/monitoring)
    pub fn stats(&self) -> PoolStats {
        let buckets: Vec<Arc<Bucket>> = lock(&self.inner.buckets).values().cloned().collect();
        let max_streams = self.inner.config.max_streams_per_connection.max(1);
        let mut stats = PoolStats::default();
        for bucket in buckets {
            stats.http1_idle_connections += lock(&bucket.idle).len();
            for conn in lock(&bucket.shared).iter() {
                match conn.handle.version() {
                    HttpVersion::Http3 => stats.http3_connections += 1,
                    _ => stats.http2_connections += 1,
                }
                stats.active_streams += max_streams.saturating_sub(conn.streams.available_permits());
            }
        }
        stats.total_connections =
            stats.http1_idle_connections + stats.http2_connections + stats.http3_connections;
        stats
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        lock(&self.inner.buckets).len()
    }
}

async fn within_pool_timeout<T>(
    pool_timeout: Option<Duration>,
    fut: impl std::future::Future<Output = T>,
) -> Result<T> {
    match pool_timeout {
        Some(t) => tokio::time::timeout(t, fut)
            .await
            .map_err(|_| Error::PoolTimeout(t)),
        None => Ok(fut.await),
    }
}
