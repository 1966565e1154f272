//! The forwarder capability and the statistics registry.
//!
//! Every runtime forwarder, regardless of protocol, exposes the same
//! narrow surface: an identifier, an instantaneous statistics snapshot,
//! and an idempotent stop. External observers hold forwarders by this
//! capability, never by concrete type.

mod contract;
mod registry;

pub use contract::{Forwarder, StatsSnapshot, TcpStats, UdpStats};
pub use registry::StatsRegistry;
