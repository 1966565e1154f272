//! The forwarder capability trait and statistics snapshot types.

use async_trait::async_trait;

/// Counters and gauges exposed by a TCP forwarder and its pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpStats {
    /// Client connections accepted since start.
    pub total_connections: u64,

    /// Client connections currently being relayed.
    pub active_connections: u64,

    /// Forwarding and pool errors.
    pub errors: u64,

    /// Upstream connections dialed on demand (outside prewarm and
    /// scale-up).
    pub reconnects: u64,

    /// Established upstream connections (idle plus lent).
    pub pool_size: usize,

    /// Idle upstream connections ready to be lent.
    pub idle_connections: usize,

    /// Acquirers currently queued for an upstream connection.
    pub waiting_queue_size: usize,

    /// Scaling decisions taken by the pool monitor.
    pub pool_scales: u64,
}

/// Counters and gauges exposed by a UDP forwarder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UdpStats {
    /// Datagrams relayed in either direction.
    pub messages_forwarded: u64,

    /// Client sessions created since start.
    pub client_connections: u64,

    /// Send and receive errors.
    pub errors: u64,

    /// Client sessions currently in the table.
    pub active_clients: usize,
}

/// An immutable statistics snapshot taken from a forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSnapshot {
    /// Snapshot of a TCP forwarder.
    Tcp(TcpStats),

    /// Snapshot of a UDP forwarder.
    Udp(UdpStats),
}

impl StatsSnapshot {
    /// The snapshot's error counter, protocol-independent.
    #[must_use]
    pub fn errors(&self) -> u64 {
        match self {
            Self::Tcp(stats) => stats.errors,
            Self::Udp(stats) => stats.errors,
        }
    }
}

/// The capability every runtime forwarder exposes.
///
/// Snapshots read atomic counters only and never block the data path.
/// `stop` is idempotent: the second and later calls are no-ops. After
/// `stop` returns, the forwarder's listener no longer accepts traffic
/// and all of its sockets are closed.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Stable identifier of form `tcp_{ruleId}_{index}` or
    /// `udp_{ruleId}_{index}`.
    fn id(&self) -> &str;

    /// Take an instantaneous statistics snapshot.
    fn snapshot(&self) -> StatsSnapshot;

    /// Stop the forwarder and release its resources.
    async fn stop(&self);
}
