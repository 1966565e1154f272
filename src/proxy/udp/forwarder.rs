//! UDP forwarder: server socket, session creation, and reply routing.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::forwarder::{Forwarder, StatsSnapshot, UdpStats};
use crate::proxy::socket;

use super::config::UdpSettings;
use super::error::{UdpProxyError, UdpProxyResult};
use super::session::{SessionTable, UdpSession};

struct UdpCounters {
    forwarded: AtomicU64,
    clients: AtomicU64,
    errors: AtomicU64,
}

/// Forwards UDP datagrams from one local port to one target port with a
/// per-client session table.
pub struct UdpForwarder {
    id: String,
    local_host: String,
    local_port: u16,
    target_host: String,
    target_port: u16,
    settings: UdpSettings,
    sessions: Arc<SessionTable>,
    counters: Arc<UdpCounters>,
    shutdown: broadcast::Sender<()>,
    stopped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    bind_error: Mutex<Option<UdpProxyError>>,
}

impl UdpForwarder {
    /// Bind the server socket and start the receive and sweep loops.
    ///
    /// Like the TCP side, a bind failure is recorded and logged but does
    /// not abort startup.
    pub async fn spawn(
        id: String,
        local_host: String,
        local_port: u16,
        target_host: String,
        target_port: u16,
        settings: UdpSettings,
    ) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        let forwarder = Arc::new(Self {
            id,
            local_host,
            local_port,
            target_host,
            target_port,
            settings,
            sessions: Arc::new(SessionTable::new()),
            counters: Arc::new(UdpCounters {
                forwarded: AtomicU64::new(0),
                clients: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            }),
            shutdown,
            stopped: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            bind_error: Mutex::new(None),
        });

        let address = format!("{}:{}", forwarder.local_host, forwarder.local_port);
        let server = match socket::bind_udp(&address, forwarder.settings.socket_buffer_bytes).await
        {
            Ok(server) => Arc::new(server),
            Err(e) => {
                let error = UdpProxyError::BindError {
                    address,
                    source: e,
                };
                error!(proxy = %forwarder.id, error = %error, "Failed to bind UDP socket");
                forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                *forwarder.bind_error.lock().unwrap() = Some(error);
                return forwarder;
            },
        };

        info!(proxy = %forwarder.id, addr = %address, "UDP listener started");

        // Subscribe before spawning so a stop signal sent right after
        // spawn cannot be missed.
        let recv_shutdown = forwarder.shutdown.subscribe();
        let sweep_shutdown = forwarder.shutdown.subscribe();
        let recv_task = tokio::spawn(Self::recv_loop(
            Arc::clone(&forwarder),
            server,
            recv_shutdown,
        ));
        let sweep_task = tokio::spawn(Self::sweep_loop(Arc::clone(&forwarder), sweep_shutdown));
        *forwarder.tasks.lock().unwrap() = vec![recv_task, sweep_task];

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

    async fn recv_loop(
        forwarder: Arc<Self>,
        server: Arc<UdpSocket>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut buf = vec![0u8; forwarder.settings.max_datagram_bytes];

        loop {
            tokio::select! {
                received = server.recv_from(&mut buf) => match received {
                    Ok((len, client)) => {
                        if let Err(e) =
                            Self::handle_inbound(&forwarder, &server, &buf[..len], client).await
                        {
                            forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                            warn!(proxy = %forwarder.id, client = %client, error = %e, "Failed to relay datagram");
                        }
                    },
                    Err(e) => {
                        forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                        error!(proxy = %forwarder.id, error = %e, "UDP receive error");
                    },
                },
                _ = shutdown.recv() => {
                    info!(proxy = %forwarder.id, "UDP listener stopped");
                    break;
                }
            }
        }
    }

    /// Relay one datagram from a client toward the target, creating the
    /// client's session on first contact.
    async fn handle_inbound(
        forwarder: &Arc<Self>,
        server: &Arc<UdpSocket>,
        datagram: &[u8],
        client: SocketAddr,
    ) -> UdpProxyResult<()> {
        let session = match forwarder.sessions.get(&client).await {
            Some(session) => session,
            None => Self::open_session(forwarder, server, client).await?,
        };

        session.touch(forwarder.sessions.epoch());

        match session.upstream().send(datagram).await {
            Ok(sent) => {
                forwarder.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    proxy = %forwarder.id,
                    client = %client,
                    bytes = sent,
                    "Forwarded datagram to target"
                );
                Ok(())
            },
            Err(e) => {
                // The session's own socket failed; it cannot carry
                // traffic anymore.
                session.record_error();
                forwarder.sessions.remove(&client).await;
                Err(UdpProxyError::SendError { client, source: e })
            },
        }
    }

    /// Open a per-client upstream socket, connect it to the target, and
    /// start the reply pump that routes target replies back through the
    /// server socket.
    async fn open_session(
        forwarder: &Arc<Self>,
        server: &Arc<UdpSocket>,
        client: SocketAddr,
    ) -> UdpProxyResult<Arc<UdpSession>> {
        // Address family follows the target, not the client.
        let is_v6 = forwarder
            .target_host
            .parse::<IpAddr>()
            .map(|ip| ip.is_ipv6())
            .unwrap_or(false);
        let bind_addr = if is_v6 { "[::]:0" } else { "0.0.0.0:0" };

        let upstream = socket::bind_udp(bind_addr, forwarder.settings.socket_buffer_bytes)
            .await
            .map_err(|source| UdpProxyError::SessionError { client, source })?;
        upstream
            .connect((forwarder.target_host.as_str(), forwarder.target_port))
            .await
            .map_err(|source| UdpProxyError::SessionError { client, source })?;

        let upstream = Arc::new(upstream);
        let session = Arc::new(UdpSession::new(
            client,
            Arc::clone(&upstream),
            forwarder.sessions.epoch(),
        ));

        let pump = tokio::spawn(Self::reply_pump(
            Arc::clone(forwarder),
            Arc::clone(server),
            Arc::clone(&session),
        ));
        session.set_reply_task(pump);

        forwarder.sessions.insert(Arc::clone(&session)).await;
        forwarder.counters.clients.fetch_add(1, Ordering::Relaxed);

        debug!(
            proxy = %forwarder.id,
            client = %client,
            upstream = %session.upstream().local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "Opened UDP client session"
        );

        Ok(session)
    }

    /// Route every datagram the target sends on a session's upstream
    /// socket back to the session's client.
    async fn reply_pump(forwarder: Arc<Self>, server: Arc<UdpSocket>, session: Arc<UdpSession>) {
        let client = session.client();
        let mut buf = vec![0u8; forwarder.settings.max_datagram_bytes];

        loop {
            match session.upstream().recv(&mut buf).await {
                Ok(len) => match server.send_to(&buf[..len], client).await {
                    Ok(_) => {
                        session.touch(forwarder.sessions.epoch());
                        forwarder.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(e) => {
                        // Reply delivery failed; the session itself is
                        // still usable.
                        session.record_error();
                        forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(proxy = %forwarder.id, client = %client, error = %e, "Failed to send reply to client");
                    },
                },
                Err(e) => {
                    forwarder.counters.errors.fetch_add(1, Ordering::Relaxed);
                    debug!(proxy = %forwarder.id, client = %client, error = %e, "Upstream socket error, dropping session");
                    forwarder.sessions.remove(&client).await;
                    break;
                },
            }
        }
    }

    async fn sweep_loop(forwarder: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(forwarder.settings.sweep_interval());
        let timeout = forwarder.settings.client_timeout();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = forwarder.sessions.evict_idle(timeout).await;
                    if removed > 0 {
                        debug!(proxy = %forwarder.id, removed, "Evicted idle UDP sessions");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

#[async_trait]
impl Forwarder for UdpForwarder {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::Udp(UdpStats {
            messages_forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            client_connections: self.counters.clients.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            active_clients: self.sessions.active_count(),
        })
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }

        let closed = self.sessions.clear().await;
        info!(proxy = %self.id, sessions = closed, "UDP forwarder stopped");
    }
}
