//! Per-client UDP session tracking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

/// One client's forwarding state: the dedicated upstream socket, the
/// reply pump driving it, and activity bookkeeping.
///
/// Activity timestamps are milliseconds relative to the owning table's
/// epoch so both directions can touch the session without a lock.
pub struct UdpSession {
    client: SocketAddr,
    upstream: Arc<UdpSocket>,
    last_activity_ms: AtomicU64,
    errors: AtomicU64,
    reply_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpSession {
    /// Create a session for `client` over `upstream`.
    #[must_use]
    pub fn new(client: SocketAddr, upstream: Arc<UdpSocket>, epoch: Instant) -> Self {
        Self {
            client,
            upstream,
            last_activity_ms: AtomicU64::new(elapsed_ms(epoch)),
            errors: AtomicU64::new(0),
            reply_task: Mutex::new(None),
        }
    }

    /// The client this session belongs to.
    #[must_use]
    pub fn client(&self) -> SocketAddr {
        self.client
    }

    /// The session's dedicated upstream socket.
    #[must_use]
    pub fn upstream(&self) -> &Arc<UdpSocket> {
        &self.upstream
    }

    /// Record activity in either direction.
    pub fn touch(&self, epoch: Instant) {
        // Activity only moves forward.
        self.last_activity_ms
            .fetch_max(elapsed_ms(epoch), Ordering::Relaxed);
    }

    /// Time since the last datagram in either direction.
    #[must_use]
    pub fn idle_for(&self, epoch: Instant) -> Duration {
        let idle = elapsed_ms(epoch).saturating_sub(self.last_activity_ms.load(Ordering::Relaxed));
        Duration::from_millis(idle)
    }

    /// Count a send failure on this session.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Send failures recorded on this session.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Attach the reply pump task.
    pub(crate) fn set_reply_task(&self, task: JoinHandle<()>) {
        *self.reply_task.lock().unwrap() = Some(task);
    }

    /// Abort the reply pump and wait for it to finish, so its reference
    /// to the upstream socket is gone when this returns.
    async fn abort(&self) {
        let task = self.reply_task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

/// The session table of one UDP forwarder, keyed by client address.
pub struct SessionTable {
    sessions: RwLock<HashMap<SocketAddr, Arc<UdpSession>>>,
    active: AtomicUsize,
    epoch: Instant,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            epoch: Instant::now(),
        }
    }

    /// The table's time base for session activity stamps.
    #[must_use]
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Look up a client's session.
    pub async fn get(&self, client: &SocketAddr) -> Option<Arc<UdpSession>> {
        self.sessions.read().await.get(client).cloned()
    }

    /// Insert a session, replacing any previous one for the client.
    pub async fn insert(&self, session: Arc<UdpSession>) {
        let previous = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions.insert(session.client(), session);
            self.active.store(sessions.len(), Ordering::Relaxed);
            previous
        };
        if let Some(previous) = previous {
            previous.abort().await;
        }
    }

    /// Remove and tear down a client's session.
    pub async fn remove(&self, client: &SocketAddr) -> Option<Arc<UdpSession>> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(client);
            self.active.store(sessions.len(), Ordering::Relaxed);
            removed
        };
        if let Some(ref session) = removed {
            session.abort().await;
        }
        removed
    }

    /// Evict sessions idle longer than `timeout`. Returns how many were
    /// removed.
    pub async fn evict_idle(&self, timeout: Duration) -> usize {
        let mut evicted = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|_, session| {
                if session.idle_for(self.epoch) > timeout {
                    evicted.push(Arc::clone(session));
                    false
                } else {
                    true
                }
            });
            self.active.store(sessions.len(), Ordering::Relaxed);
        }

        for session in &evicted {
            session.abort().await;
            debug!(client = %session.client(), "Evicted idle UDP session");
        }
        evicted.len()
    }

    /// Remove every session. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            let drained = sessions.drain().map(|(_, session)| session).collect();
            self.active.store(0, Ordering::Relaxed);
            drained
        };
        for session in &drained {
            session.abort().await;
        }
        drained.len()
    }

    /// Number of live sessions, readable without locking.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn client_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    async fn make_session(table: &SessionTable, port: u16) -> Arc<UdpSession> {
        let upstream = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        Arc::new(UdpSession::new(client_addr(port), upstream, table.epoch()))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let table = SessionTable::new();
        let session = make_session(&table, 40001).await;

        table.insert(Arc::clone(&session)).await;
        assert_eq!(table.active_count(), 1);

        let found = table.get(&client_addr(40001)).await.unwrap();
        assert_eq!(found.client(), session.client());
        assert!(table.get(&client_addr(40002)).await.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let table = SessionTable::new();
        table.insert(make_session(&table, 40001).await).await;

        assert!(table.remove(&client_addr(40001)).await.is_some());
        assert!(table.remove(&client_addr(40001)).await.is_none());
        assert_eq!(table.active_count(), 0);
    }

    #[tokio::test]
    async fn test_touch_keeps_session_fresh() {
        let table = SessionTable::new();
        let session = make_session(&table, 40001).await;
        table.insert(Arc::clone(&session)).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        session.touch(table.epoch());
        assert!(session.idle_for(table.epoch()) < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_evict_idle_removes_only_stale_sessions() {
        let table = SessionTable::new();
        let stale = make_session(&table, 40001).await;
        let fresh = make_session(&table, 40002).await;
        table.insert(Arc::clone(&stale)).await;
        table.insert(Arc::clone(&fresh)).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        fresh.touch(table.epoch());

        let removed = table.evict_idle(Duration::from_millis(50)).await;
        assert_eq!(removed, 1);
        assert_eq!(table.active_count(), 1);
        assert!(table.get(&client_addr(40001)).await.is_none());
        assert!(table.get(&client_addr(40002)).await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let table = SessionTable::new();
        table.insert(make_session(&table, 40001).await).await;
        table.insert(make_session(&table, 40002).await).await;

        assert_eq!(table.clear().await, 2);
        assert_eq!(table.active_count(), 0);
    }
}
