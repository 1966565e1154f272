//! TCP forwarder: local listener plus bidirectional relay.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace};

use crate::forwarder::{Forwarder, StatsSnapshot, TcpStats};
use crate::proxy::socket;

use super::config::PoolSettings;
use super::error::TcpProxyError;
use super::pool::{ConnectionPool, PooledConn};

/// Size of the transient per-read relay buffer. Data never queues in
/// user space beyond one read's worth per direction.
const RELAY_BUF_BYTES: usize = 16 * 1024;

/// Why a relay loop ended.
enum RelayEnd {
    /// The client sent EOF; the upstream connection is still clean.
    ClientClosed,

    /// The upstream sent EOF; the pooled connection is spent.
    UpstreamClosed,

    /// IO error on the client side.
    ClientError(std::io::Error),

    /// IO error on the upstream side.
    UpstreamError(std::io::Error),
}

struct ForwarderCounters {
    total: AtomicU64,
    active: AtomicU64,
    errors: AtomicU64,
}

/// Forwards TCP connections from one local port to one target port
/// through a shared upstream connection pool.
pub struct TcpForwarder {
    id: String,
    local_host: String,
    local_port: u16,
    pool: ConnectionPool,
    settings: PoolSettings,
    counters: Arc<ForwarderCounters>,
    shutdown: broadcast::Sender<()>,
    stopped: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    /// In-flight relay tasks; stop drains this so no client or leased
    /// upstream socket survives it.
    relay_tasks: Mutex<JoinSet<()>>,
    bind_error: Mutex<Option<TcpProxyError>>,
}

impl TcpForwarder {
    /// Bind the local listener and start accepting.
    ///
    /// A bind failure is recorded on the forwarder and logged; the
    /// forwarder still exists so the failure shows up in snapshots and
    /// the rest of the rule's forwarders keep running.
    pub async fn spawn(
        id: String,
        local_host: String,
        local_port: u16,
        pool: ConnectionPool,
        settings: PoolSettings,
    ) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        let forwarder = Arc::new(Self {
            id,
            local_host,
            local_port,
            pool,
            settings,
            counters: Arc::new(ForwarderCounters {
                total: AtomicU64::new(0),
                active: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            }),
            shutdown,
            stopped: AtomicBool::new(false),
            accept_task: Mutex::new(None),
            relay_tasks: Mutex::new(JoinSet::new()),
            bind_error: Mutex::new(None),
        });

        let address = format!("{}:{}", forwarder.local_host, forwarder.local_port);
        match TcpListener::bind(&address).await {
            Ok(listener) => {
                info!(proxy = %forwarder.id, addr = %address, "TCP listener started");
                // Subscribe before spawning so a stop signal sent right
                // after spawn cannot be missed.
                let shutdown = forwarder.shutdown.subscribe();
                let task =
                    tokio::spawn(Self::accept_loop(Arc::clone(&forwarder), listener, shutdown));
                *forwarder.accept_task.lock().unwrap() = Some(task);
            },
            Err(e) => {
                let error = TcpProxyError::BindError {
                    address,
                    source: e,
                };
                error!(proxy = %forwarder.id, error = %error, "Failed to bind TCP listener");
                forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                *forwarder.bind_error.lock().unwrap() = Some(error);
            },
        }

        forwarder
    }

    /// The local port this forwarder listens on.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The bind failure recorded at startup, if any.
    #[must_use]
    pub fn bind_error(&self) -> Option<String> {
        self.bind_error.lock().unwrap().as_ref().map(ToString::to_string)
    }

    async fn accept_loop(
        forwarder: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((client, peer)) => {
                        forwarder.counters.total.fetch_add(1, Ordering::Relaxed);
                        debug!(proxy = %forwarder.id, peer = %peer, "Accepted client connection");

                        let relay_forwarder = Arc::clone(&forwarder);
                        let mut relays = forwarder.relay_tasks.lock().unwrap();
                        // Reap finished relays so the set stays small.
                        while relays.try_join_next().is_some() {}
                        relays.spawn(async move {
                            relay_forwarder.counters.active.fetch_add(1, Ordering::Relaxed);
                            Self::handle_connection(&relay_forwarder, client).await;
                            relay_forwarder.counters.active.fetch_sub(1, Ordering::Relaxed);
                        });
                    },
                    Err(e) => {
                        forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                        error!(proxy = %forwarder.id, error = %e, "Failed to accept connection");
                    },
                },
                _ = shutdown.recv() => {
                    info!(proxy = %forwarder.id, "TCP listener stopped");
                    break;
                }
            }
        }
    }

    /// Relay one accepted client connection over a pooled upstream
    /// connection until either side closes.
    async fn handle_connection(forwarder: &Arc<Self>, client: TcpStream) {
        let mut client = match socket::tune_tcp(
            client,
            forwarder.settings.keep_alive(),
            forwarder.settings.socket_buffer_bytes,
        ) {
            Ok(client) => client,
            Err(e) => {
                forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!(proxy = %forwarder.id, error = %e, "Client socket tuning failed");
                return;
            },
        };

        let mut upstream = match forwarder.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                // Already counted by the pool.
                debug!(proxy = %forwarder.id, error = %e, "No upstream available, dropping client");
                return;
            },
        };

        let mut shutdown = forwarder.shutdown.subscribe();
        if forwarder.stopped.load(Ordering::SeqCst) {
            // Stop raced with this connection; the broadcast may have
            // fired before the subscription above.
            upstream.discard().await;
            return;
        }

        let end = tokio::select! {
            end = Self::relay(&mut client, upstream.stream_mut()) => end,
            _ = shutdown.recv() => {
                upstream.discard().await;
                trace!(proxy = %forwarder.id, "Relay torn down by shutdown");
                return;
            }
        };

        match end {
            RelayEnd::ClientClosed => {
                trace!(proxy = %forwarder.id, "Client closed, releasing upstream");
                upstream.release().await;
            },
            RelayEnd::UpstreamClosed => {
                trace!(proxy = %forwarder.id, "Upstream closed, discarding connection");
                upstream.discard().await;
            },
            RelayEnd::ClientError(e) => {
                forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!(proxy = %forwarder.id, error = %e, "Client socket error");
                upstream.discard().await;
            },
            RelayEnd::UpstreamError(e) => {
                forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!(proxy = %forwarder.id, error = %e, "Upstream socket error");
                upstream.discard().await;
            },
        }
    }

    /// Copy bytes in both directions through transient bounded buffers.
    ///
    /// A full destination pauses reads from its source, so backpressure
    /// propagates to the slower side.
    async fn relay(client: &mut TcpStream, upstream: &mut TcpStream) -> RelayEnd {
        let mut client_buf = vec![0u8; RELAY_BUF_BYTES];
        let mut upstream_buf = vec![0u8; RELAY_BUF_BYTES];

        loop {
            tokio::select! {
                read = client.read(&mut client_buf) => match read {
                    Ok(0) => return RelayEnd::ClientClosed,
                    Ok(n) => {
                        if let Err(e) = upstream.write_all(&client_buf[..n]).await {
                            return RelayEnd::UpstreamError(e);
                        }
                    },
                    Err(e) => return RelayEnd::ClientError(e),
                },
                read = upstream.read(&mut upstream_buf) => match read {
                    Ok(0) => return RelayEnd::UpstreamClosed,
                    Ok(n) => {
                        if let Err(e) = client.write_all(&upstream_buf[..n]).await {
                            return RelayEnd::ClientError(e);
                        }
                    },
                    Err(e) => return RelayEnd::UpstreamError(e),
                },
            }
        }
    }
}

#[async_trait]
impl Forwarder for TcpForwarder {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> StatsSnapshot {
        let pool = self.pool.stats();
        StatsSnapshot::Tcp(TcpStats {
            total_connections: self.counters.total.load(Ordering::Relaxed),
            active_connections: self.counters.active.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed) + pool.errors,
            reconnects: pool.reconnects,
            pool_size: pool.size,
            idle_connections: pool.idle,
            waiting_queue_size: pool.waiting,
            pool_scales: pool.scales,
        })
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(());
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        // Close the pool first so relays still queued in acquire resolve
        // immediately, then wait for every relay to tear down its
        // sockets.
        self.pool.close().await;
        let mut relays = std::mem::take(&mut *self.relay_tasks.lock().unwrap());
        while relays.join_next().await.is_some() {}

        info!(proxy = %self.id, "TCP forwarder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn start_held_upstream() -> SocketAddr {
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

    fn test_settings() -> PoolSettings {
        PoolSettings {
            min_pool_size: 0,
            initial_pool_size: 0,
            acquire_timeout_secs: 1,
            ..PoolSettings::default()
        }
    }

    #[tokio::test]
    async fn test_snapshot_starts_at_zero() {
        let upstream = start_held_upstream().await;
        let settings = test_settings();
        let pool = ConnectionPool::new(upstream.ip().to_string(), upstream.port(), settings.clone());
        let forwarder = TcpForwarder::spawn(
            "tcp_1_0".to_string(),
            "127.0.0.1".to_string(),
            0,
            pool,
            settings,
        )
        .await;

        match forwarder.snapshot() {
            StatsSnapshot::Tcp(stats) => {
                assert_eq!(stats.total_connections, 0);
                assert_eq!(stats.active_connections, 0);
            },
            StatsSnapshot::Udp(_) => panic!("expected TCP snapshot"),
        }
        forwarder.stop().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_recorded() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let upstream = start_held_upstream().await;
        let settings = test_settings();
        let pool = ConnectionPool::new(upstream.ip().to_string(), upstream.port(), settings.clone());
        let forwarder = TcpForwarder::spawn(
            "tcp_1_0".to_string(),
            "127.0.0.1".to_string(),
            port,
            pool,
            settings,
        )
        .await;

        assert!(forwarder.bind_error().is_some());
        forwarder.stop().await;
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let upstream = start_held_upstream().await;
        let settings = test_settings();
        let pool = ConnectionPool::new(upstream.ip().to_string(), upstream.port(), settings.clone());
        let forwarder = TcpForwarder::spawn(
            "tcp_1_0".to_string(),
            "127.0.0.1".to_string(),
            0,
            pool,
            settings,
        )
        .await;

        forwarder.stop().await;
        forwarder.stop().await;
    }
}
