//! # R0N Forward
//!
//! A multi-rule layer-4 forwarding proxy. It accepts TCP connections and
//! UDP datagrams on configured local endpoints and relays them,
//! bidirectionally and transparently, to configured upstream endpoints.
//!
//! ## Features
//!
//! - Single-port and contiguous port-range forwarding rules
//! - Pooled TCP forwarding with prewarming and dynamic scaling
//! - NAT-style UDP forwarding with per-client sessions and idle eviction
//! - Per-forwarder statistics snapshots
//! - Graceful shutdown on interrupt and terminate signals
//!
//! ## Architecture
//!
//! Forwarding rules are loaded from a JSON file ([`config`]) and bound by
//! the [`binder`], which instantiates one forwarder per derived
//! `(local port, target port)` pair. All forwarders implement the
//! [`forwarder::Forwarder`] capability and are held by a
//! [`forwarder::StatsRegistry`] for observation. The [`gateway`] owns the
//! set of running forwarders and drives startup and shutdown.
//!
//! The proxy is protocol-agnostic at layer 7: payload bytes are never
//! inspected, transformed, or filtered.

pub mod binder;
pub mod config;
pub mod forwarder;
pub mod gateway;
pub mod proxy;
