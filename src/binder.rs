//! Rule binding: turning forwarding rules into running forwarders.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConfigResult, ForwardRule, Protocol};
use crate::forwarder::Forwarder;
use crate::proxy::tcp::{ConnectionPool, PoolSettings, TcpForwarder};
use crate::proxy::udp::{UdpForwarder, UdpSettings};

/// Bind one rule: validate it, expand its port mappings, and start one
/// forwarder per `(local port, target port)` pair.
///
/// For TCP rules, pools are deduplicated by target port within the rule
/// so every local port mapping to the same target port shares one pool.
/// Forwarder ids are `tcp_{ruleId}_{index}` or `udp_{ruleId}_{index}`,
/// indexed in mapping order.
///
/// # Errors
///
/// Returns the rule's validation error; the caller decides whether to
/// skip the rule or abort.
pub async fn bind_rule(
    rule: &ForwardRule,
    pool_settings: &PoolSettings,
    udp_settings: &UdpSettings,
) -> ConfigResult<Vec<Arc<dyn Forwarder>>> {
    let mappings = rule.mappings()?;
    let mut forwarders: Vec<Arc<dyn Forwarder>> = Vec::with_capacity(mappings.len());

    match rule.protocol {
        Protocol::Tcp => {
            let mut pools: HashMap<u16, ConnectionPool> = HashMap::new();

            for (index, mapping) in mappings.iter().enumerate() {
                let pool = pools
                    .entry(mapping.target_port)
                    .or_insert_with(|| {
                        debug!(
                            rule = rule.id,
                            target_host = %rule.target_host,
                            target_port = mapping.target_port,
                            "Creating connection pool"
                        );
                        ConnectionPool::new(
                            rule.target_host.clone(),
                            mapping.target_port,
                            pool_settings.clone(),
                        )
                    })
                    .clone();

                let forwarder = TcpForwarder::spawn(
                    format!("tcp_{}_{}", rule.id, index),
                    rule.local_host.clone(),
                    mapping.local_port,
                    pool,
                    pool_settings.clone(),
                )
                .await;
                forwarders.push(forwarder);
            }
        },
        Protocol::Udp => {
            for (index, mapping) in mappings.iter().enumerate() {
                let forwarder = UdpForwarder::spawn(
                    format!("udp_{}_{}", rule.id, index),
                    rule.local_host.clone(),
                    mapping.local_port,
                    rule.target_host.clone(),
                    mapping.target_port,
                    udp_settings.clone(),
                )
                .await;
                forwarders.push(forwarder);
            }
        },
    }

    info!(
        rule = rule.id,
        name = rule.name.as_deref().unwrap_or(""),
        protocol = %rule.protocol,
        forwarders = forwarders.len(),
        "Bound forwarding rule"
    );

    Ok(forwarders)
}
