//! Dynamic upstream connection pool.
//!
//! The pool owns every established connection toward one
//! `(target host, target port)` endpoint. Connections are prewarmed at
//! construction, lent out on [`ConnectionPool::acquire`], and returned
//! on [`PooledConn::release`]. A monitor task grows and shrinks the pool
//! with the observed active ratio; a sweep task destroys connections
//! that have sat idle past the configured threshold and drops orphaned
//! queue entries.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::proxy::socket;

use super::config::PoolSettings;
use super::error::{TcpProxyError, TcpProxyResult};

/// An idle connection held by the pool.
struct IdleConn {
    id: u64,
    stream: TcpStream,
    created_at: Instant,
    last_activity: Instant,
    errors: u32,
}

/// Metadata for a connection currently lent to a forwarder.
struct LentConn {
    created_at: Instant,
    errors: u32,
}

/// A suspended acquirer waiting for a connection to free up.
struct Waiter {
    tx: oneshot::Sender<PooledConn>,
    enqueued_at: Instant,
}

/// State guarded by the pool's single serialization domain.
struct PoolState {
    idle: Vec<IdleConn>,
    lent: HashMap<u64, LentConn>,
    waiters: VecDeque<Waiter>,
    /// Dials in flight, counted toward the size ceiling.
    dialing: usize,
    next_id: u64,
    last_scale: Instant,
}

impl PoolState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn total(&self) -> usize {
        self.idle.len() + self.lent.len() + self.dialing
    }
}

/// Gauges mirrored out of the locked state for lock-free snapshots.
struct PoolGauges {
    size: AtomicUsize,
    idle: AtomicUsize,
    waiting: AtomicUsize,
}

/// Monotonic counters.
struct PoolCounters {
    errors: AtomicU64,
    reconnects: AtomicU64,
    scales: AtomicU64,
}

/// An instantaneous view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Established connections (idle plus lent).
    pub size: usize,

    /// Idle connections ready to be lent.
    pub idle: usize,

    /// Acquirers currently queued.
    pub waiting: usize,

    /// Scaling decisions taken.
    pub scales: u64,

    /// Connections dialed on demand for an acquirer.
    pub reconnects: u64,

    /// Dial failures and acquire timeouts.
    pub errors: u64,
}

pub(crate) struct PoolInner {
    target_host: String,
    target_port: u16,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    gauges: PoolGauges,
    counters: PoolCounters,
    /// Held while a grow or shrink operation is in progress.
    scaling: AtomicBool,
    prewarmed: AtomicBool,
    closed: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

/// A connection lent out by the pool.
///
/// Exactly one of three things happens to a lease: [`release`] returns
/// the connection for reuse, [`discard`] removes it from the pool, or
/// the lease is dropped, which also removes it.
///
/// [`release`]: PooledConn::release
/// [`discard`]: PooledConn::discard
pub struct PooledConn {
    id: u64,
    stream: Option<TcpStream>,
    pool: Arc<PoolInner>,
}

impl PooledConn {
    /// The underlying stream.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("stream taken")
    }

    /// Return a cleanly idle connection to the pool.
    ///
    /// If an acquirer is queued the connection is re-lent immediately
    /// with no idle gap.
    pub async fn release(mut self) {
        if let Some(stream) = self.stream.take() {
            PoolInner::release(&self.pool, self.id, stream).await;
        }
    }

    /// Remove the connection from the pool and close its socket.
    ///
    /// Used when the upstream side closed or errored; such a connection
    /// must never be reused.
    pub async fn discard(mut self) {
        if self.stream.take().is_some() {
            PoolInner::forget(&self.pool, self.id).await;
        }
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            let pool = Arc::clone(&self.pool);
            let id = self.id;
            tokio::spawn(async move {
                PoolInner::forget(&pool, id).await;
            });
        }
    }
}

impl PoolInner {
    fn sync_gauges(&self, state: &PoolState) {
        self.gauges
            .size
            .store(state.idle.len() + state.lent.len(), Ordering::Relaxed);
        self.gauges.idle.store(state.idle.len(), Ordering::Relaxed);
        self.gauges
            .waiting
            .store(state.waiters.len(), Ordering::Relaxed);
    }

    /// Establish and tune one upstream connection.
    async fn dial(&self) -> TcpProxyResult<TcpStream> {
        let stream = timeout(
            self.settings.connect_timeout(),
            TcpStream::connect((self.target_host.as_str(), self.target_port)),
        )
        .await
        .map_err(|_| TcpProxyError::ConnectTimeout {
            host: self.target_host.clone(),
            port: self.target_port,
        })?
        .map_err(|source| TcpProxyError::DialError {
            host: self.target_host.clone(),
            port: self.target_port,
            source,
        })?;

        let stream = socket::tune_tcp(
            stream,
            self.settings.keep_alive(),
            self.settings.socket_buffer_bytes,
        )?;

        trace!(
            target_host = %self.target_host,
            target_port = self.target_port,
            "Dialed upstream connection"
        );
        Ok(stream)
    }

    /// Hand a connection to the first live waiter, if any.
    ///
    /// Returns the stream back to the caller when no waiter took it.
    fn offer_to_waiters(
        pool: &Arc<Self>,
        state: &mut PoolState,
        id: u64,
        created_at: Instant,
        errors: u32,
        stream: TcpStream,
    ) -> Option<TcpStream> {
        let mut stream = Some(stream);
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.is_closed() {
                continue;
            }
            state.lent.insert(id, LentConn { created_at, errors });
            let conn = PooledConn {
                id,
                stream: stream.take(),
                pool: Arc::clone(pool),
            };
            match waiter.tx.send(conn) {
                Ok(()) => return None,
                Err(mut conn) => {
                    // Receiver vanished between the liveness check and
                    // the send; reclaim the stream and try the next one.
                    stream = conn.stream.take();
                    state.lent.remove(&id);
                },
            }
        }
        stream
    }

    /// Account for a completed dial and add the connection to the pool,
    /// serving the waiter queue first.
    async fn admit(pool: &Arc<Self>, stream: TcpStream) {
        let mut state = pool.state.lock().await;
        state.dialing = state.dialing.saturating_sub(1);

        if pool.closed.load(Ordering::SeqCst) {
            pool.sync_gauges(&state);
            return;
        }

        let id = state.alloc_id();
        let now = Instant::now();
        if let Some(stream) = Self::offer_to_waiters(pool, &mut state, id, now, 0, stream) {
            state.idle.push(IdleConn {
                id,
                stream,
                created_at: now,
                last_activity: now,
                errors: 0,
            });
        }
        pool.sync_gauges(&state);
    }

    /// Account for a failed dial.
    async fn dial_failed(pool: &Arc<Self>, error: &TcpProxyError) {
        let mut state = pool.state.lock().await;
        state.dialing = state.dialing.saturating_sub(1);
        pool.counters.errors.fetch_add(1, Ordering::Relaxed);
        pool.sync_gauges(&state);
        debug!(
            target_host = %pool.target_host,
            target_port = pool.target_port,
            error = %error,
            "Upstream dial failed"
        );
    }

    /// Return a lent connection as cleanly idle.
    async fn release(pool: &Arc<Self>, id: u64, stream: TcpStream) {
        let mut state = pool.state.lock().await;

        let Some(meta) = state.lent.remove(&id) else {
            pool.sync_gauges(&state);
            return;
        };

        if pool.closed.load(Ordering::SeqCst) {
            pool.sync_gauges(&state);
            return;
        }

        if let Some(stream) =
            Self::offer_to_waiters(pool, &mut state, id, meta.created_at, meta.errors, stream)
        {
            state.idle.push(IdleConn {
                id,
                stream,
                created_at: meta.created_at,
                last_activity: Instant::now(),
                errors: meta.errors,
            });
        }
        pool.sync_gauges(&state);
    }

    /// Drop a lent connection from the pool entirely.
    async fn forget(pool: &Arc<Self>, id: u64) {
        let mut state = pool.state.lock().await;
        state.lent.remove(&id);
        pool.sync_gauges(&state);
    }

    /// One scaling decision. Skipped while another grow or shrink holds
    /// the scaling lock or the minimum gap has not elapsed.
    async fn scale_tick(pool: &Arc<Self>) {
        if pool.closed.load(Ordering::SeqCst) || pool.scaling.swap(true, Ordering::SeqCst) {
            return;
        }

        let settings = &pool.settings;
        let grow = {
            let mut state = pool.state.lock().await;
            let total = state.total();
            let active = state.lent.len();

            if total == 0 || state.last_scale.elapsed() < settings.scale_interval() {
                None
            } else {
                let ratio = active as f64 / total as f64;
                if ratio > settings.scale_up_threshold && total < settings.max_pool_size {
                    let step = settings.scale_up_step.min(settings.max_pool_size - total);
                    state.dialing += step;
                    state.last_scale = Instant::now();
                    pool.counters.scales.fetch_add(1, Ordering::Relaxed);
                    pool.sync_gauges(&state);
                    debug!(
                        target_host = %pool.target_host,
                        target_port = pool.target_port,
                        active,
                        total,
                        step,
                        "Scaling pool up"
                    );
                    Some(step)
                } else if ratio < settings.scale_down_threshold
                    && total > settings.min_pool_size
                    && !state.idle.is_empty()
                {
                    let step = settings
                        .scale_down_step
                        .min(total - settings.min_pool_size)
                        .min(state.idle.len());
                    // Destroy the longest-idle connections, never active
                    // ones.
                    state.idle.sort_by_key(|conn| conn.last_activity);
                    state.idle.drain(..step);
                    state.last_scale = Instant::now();
                    pool.counters.scales.fetch_add(1, Ordering::Relaxed);
                    pool.sync_gauges(&state);
                    debug!(
                        target_host = %pool.target_host,
                        target_port = pool.target_port,
                        active,
                        total,
                        step,
                        "Scaling pool down"
                    );
                    None
                } else {
                    None
                }
            }
        };

        if let Some(step) = grow {
            for _ in 0..step {
                match pool.dial().await {
                    Ok(stream) => Self::admit(pool, stream).await,
                    Err(e) => Self::dial_failed(pool, &e).await,
                }
            }
        }

        pool.scaling.store(false, Ordering::SeqCst);
    }

    /// Destroy idle connections past the idle threshold and drop
    /// orphaned waiter-queue entries.
    async fn sweep_tick(pool: &Arc<Self>) {
        if pool.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut state = pool.state.lock().await;
        let settings = &pool.settings;

        let mut removable = state.total().saturating_sub(settings.min_pool_size);
        if removable > 0 {
            let idle_timeout = settings.idle_timeout();
            let now = Instant::now();
            let before = state.idle.len();

            state.idle.sort_by_key(|conn| conn.last_activity);
            let mut kept = Vec::with_capacity(before);
            for conn in state.idle.drain(..) {
                if removable > 0 && now.duration_since(conn.last_activity) > idle_timeout {
                    removable -= 1;
                } else {
                    kept.push(conn);
                }
            }
            state.idle = kept;

            let evicted = before - state.idle.len();
            if evicted > 0 {
                debug!(
                    target_host = %pool.target_host,
                    target_port = pool.target_port,
                    evicted,
                    "Evicted idle upstream connections"
                );
            }
        }

        let max_age = settings.waiter_max_age();
        let before = state.waiters.len();
        state
            .waiters
            .retain(|waiter| !waiter.tx.is_closed() && waiter.enqueued_at.elapsed() <= max_age);
        let dropped = before - state.waiters.len();
        if dropped > 0 {
            trace!(dropped, "Dropped orphaned queue entries");
        }

        pool.sync_gauges(&state);
    }
}

/// A dynamic pool of established TCP connections toward one target
/// endpoint. Cheaply cloneable; clones share the same pool.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool toward `(target_host, target_port)` and start its
    /// prewarm, monitor, and sweep tasks.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(target_host: impl Into<String>, target_port: u16, settings: PoolSettings) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let inner = Arc::new(PoolInner {
            target_host: target_host.into(),
            target_port,
            settings,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                lent: HashMap::new(),
                waiters: VecDeque::new(),
                dialing: 0,
                next_id: 0,
                last_scale: Instant::now(),
            }),
            gauges: PoolGauges {
                size: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
            },
            counters: PoolCounters {
                errors: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
                scales: AtomicU64::new(0),
            },
            scaling: AtomicBool::new(false),
            prewarmed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown,
        });

        let pool = Self { inner };
        pool.spawn_prewarm();
        pool.spawn_monitor();
        pool.spawn_sweep();
        pool
    }

    /// Acquire an upstream connection.
    ///
    /// The best idle connection is preferred: fewest errors, then the
    /// newest. With no idle connection and room below the ceiling a new
    /// one is dialed for the caller. Otherwise the caller queues until a
    /// connection frees up or the queue timeout elapses.
    ///
    /// # Errors
    ///
    /// [`TcpProxyError::Unavailable`] when a dial for the caller failed,
    /// [`TcpProxyError::AcquireTimeout`] when the queue wait timed out,
    /// and [`TcpProxyError::PoolClosed`] after shutdown. In every error
    /// case the caller must drop its client connection.
    pub async fn acquire(&self) -> TcpProxyResult<PooledConn> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::SeqCst) {
            return Err(TcpProxyError::PoolClosed);
        }

        let rx = {
            let mut state = inner.state.lock().await;

            // Best idle connection: fewest errors, then newest.
            let best = state
                .idle
                .iter()
                .enumerate()
                .min_by_key(|(_, conn)| (conn.errors, Reverse(conn.created_at)))
                .map(|(index, _)| index);

            if let Some(index) = best {
                let conn = state.idle.swap_remove(index);
                state.lent.insert(
                    conn.id,
                    LentConn {
                        created_at: conn.created_at,
                        errors: conn.errors,
                    },
                );
                inner.sync_gauges(&state);
                return Ok(PooledConn {
                    id: conn.id,
                    stream: Some(conn.stream),
                    pool: Arc::clone(inner),
                });
            }

            if state.total() < inner.settings.max_pool_size
                && !inner.scaling.load(Ordering::SeqCst)
            {
                state.dialing += 1;
                inner.sync_gauges(&state);
                drop(state);

                return match inner.dial().await {
                    Ok(stream) => {
                        let mut state = inner.state.lock().await;
                        state.dialing = state.dialing.saturating_sub(1);
                        let id = state.alloc_id();
                        state.lent.insert(
                            id,
                            LentConn {
                                created_at: Instant::now(),
                                errors: 0,
                            },
                        );
                        inner.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                        inner.sync_gauges(&state);
                        Ok(PooledConn {
                            id,
                            stream: Some(stream),
                            pool: Arc::clone(inner),
                        })
                    },
                    Err(e) => {
                        PoolInner::dial_failed(inner, &e).await;
                        Err(TcpProxyError::Unavailable {
                            host: inner.target_host.clone(),
                            port: inner.target_port,
                        })
                    },
                };
            }

            // Saturated: queue behind the releases.
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter {
                tx,
                enqueued_at: Instant::now(),
            });
            inner.sync_gauges(&state);
            rx
        };

        match timeout(inner.settings.acquire_timeout(), rx).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(_)) => Err(TcpProxyError::Unavailable {
                host: inner.target_host.clone(),
                port: inner.target_port,
            }),
            Err(_) => {
                inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                let mut state = inner.state.lock().await;
                state.waiters.retain(|waiter| !waiter.tx.is_closed());
                inner.sync_gauges(&state);
                Err(TcpProxyError::AcquireTimeout {
                    host: inner.target_host.clone(),
                    port: inner.target_port,
                })
            },
        }
    }

    /// Take an instantaneous view of the pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.inner.gauges.size.load(Ordering::Relaxed),
            idle: self.inner.gauges.idle.load(Ordering::Relaxed),
            waiting: self.inner.gauges.waiting.load(Ordering::Relaxed),
            scales: self.inner.counters.scales.load(Ordering::Relaxed),
            reconnects: self.inner.counters.reconnects.load(Ordering::Relaxed),
            errors: self.inner.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Close the pool: destroy idle connections, resolve every queued
    /// acquirer with the unavailable outcome, and stop the housekeeping
    /// tasks. Idempotent. Lent connections are closed by their holders.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(());

        let mut state = self.inner.state.lock().await;
        let idle = state.idle.len();
        let waiting = state.waiters.len();
        state.idle.clear();
        state.waiters.clear();
        self.inner.sync_gauges(&state);

        info!(
            target_host = %self.inner.target_host,
            target_port = self.inner.target_port,
            idle,
            waiting,
            "Closed connection pool"
        );
    }

    /// Dial the initial connections in parallel. Individual failures
    /// are tolerated; the pool starts with whatever succeeded.
    fn spawn_prewarm(&self) {
        if self.inner.prewarmed.swap(true, Ordering::SeqCst) {
            return;
        }

        let want = self
            .inner
            .settings
            .initial_pool_size
            .min(self.inner.settings.max_pool_size);
        if want == 0 {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            {
                let mut state = inner.state.lock().await;
                state.dialing += want;
                inner.sync_gauges(&state);
            }

            let mut dials = JoinSet::new();
            for _ in 0..want {
                let inner = Arc::clone(&inner);
                dials.spawn(async move { inner.dial().await });
            }

            let mut established = 0usize;
            while let Some(result) = dials.join_next().await {
                match result {
                    Ok(Ok(stream)) => {
                        PoolInner::admit(&inner, stream).await;
                        established += 1;
                    },
                    Ok(Err(e)) => PoolInner::dial_failed(&inner, &e).await,
                    Err(_) => {
                        let mut state = inner.state.lock().await;
                        state.dialing = state.dialing.saturating_sub(1);
                        inner.sync_gauges(&state);
                    },
                }
            }

            info!(
                target_host = %inner.target_host,
                target_port = inner.target_port,
                established,
                requested = want,
                "Prewarmed connection pool"
            );
        });
    }

    fn spawn_monitor(&self) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.settings.monitor_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        PoolInner::scale_tick(&inner).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_sweep(&self) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.settings.sweep_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        PoolInner::sweep_tick(&inner).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

impl Clone for ConnectionPool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Accepts connections and holds them open.
    async fn start_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let _ = stream;
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    });
                }
            }
        });

        addr
    }

    fn settings() -> PoolSettings {
        PoolSettings {
            min_pool_size: 0,
            initial_pool_size: 0,
            acquire_timeout_secs: 1,
            ..PoolSettings::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_dials_on_demand() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(upstream.ip().to_string(), upstream.port(), settings());

        let conn = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.reconnects, 1);

        conn.release().await;
        assert_eq!(pool.stats().idle, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_release_enables_reuse() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(upstream.ip().to_string(), upstream.port(), settings());

        let conn = pool.acquire().await.unwrap();
        conn.release().await;

        let _conn = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.reconnects, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_prewarm_establishes_initial_size() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(
            upstream.ip().to_string(),
            upstream.port(),
            PoolSettings {
                min_pool_size: 0,
                initial_pool_size: 3,
                ..PoolSettings::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        let stats = pool.stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.idle, 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_saturated_acquire_times_out() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(
            upstream.ip().to_string(),
            upstream.port(),
            PoolSettings {
                max_pool_size: 1,
                ..settings()
            },
        );

        let held = pool.acquire().await.unwrap();

        let started = Instant::now();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(TcpProxyError::AcquireTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert!(started.elapsed() < Duration::from_secs(3));

        drop(held);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(
            upstream.ip().to_string(),
            upstream.port(),
            PoolSettings {
                max_pool_size: 1,
                acquire_timeout_secs: 5,
                ..settings()
            },
        );

        let held = pool.acquire().await.unwrap();

        let release_pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            held.release().await;
        });

        let started = Instant::now();
        let conn = pool.acquire().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        conn.release().await;
        release_pool.close().await;
    }

    #[tokio::test]
    async fn test_discard_removes_from_pool() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(upstream.ip().to_string(), upstream.port(), settings());

        let conn = pool.acquire().await.unwrap();
        conn.discard().await;

        let stats = pool.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.idle, 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_connections() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(
            upstream.ip().to_string(),
            upstream.port(),
            PoolSettings {
                idle_timeout_secs: 1,
                sweep_interval_secs: 1,
                ..settings()
            },
        );

        let conn = pool.acquire().await.unwrap();
        conn.release().await;
        assert_eq!(pool.stats().idle, 1);

        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().size, 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_sweep_keeps_minimum_pool_size() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(
            upstream.ip().to_string(),
            upstream.port(),
            PoolSettings {
                min_pool_size: 1,
                initial_pool_size: 0,
                idle_timeout_secs: 1,
                sweep_interval_secs: 1,
                acquire_timeout_secs: 1,
                ..PoolSettings::default()
            },
        );

        let conn = pool.acquire().await.unwrap();
        conn.release().await;

        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(pool.stats().size, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_close_resolves_waiters() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(
            upstream.ip().to_string(),
            upstream.port(),
            PoolSettings {
                max_pool_size: 1,
                acquire_timeout_secs: 5,
                ..settings()
            },
        );

        let held = pool.acquire().await.unwrap();

        let close_pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            close_pool.close().await;
        });

        let started = Instant::now();
        let result = pool.acquire().await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(held);
    }

    #[tokio::test]
    async fn test_acquire_after_close_fails() {
        let upstream = start_upstream().await;
        let pool = ConnectionPool::new(upstream.ip().to_string(), upstream.port(), settings());

        pool.close().await;
        assert!(matches!(
            pool.acquire().await,
            Err(TcpProxyError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn test_dial_failure_yields_unavailable() {
        // Nothing listens on this port.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let pool = ConnectionPool::new(addr.ip().to_string(), addr.port(), settings());
        let result = pool.acquire().await;
        assert!(matches!(result, Err(TcpProxyError::Unavailable { .. })));
        assert!(pool.stats().errors >= 1);
        pool.close().await;
    }
}
