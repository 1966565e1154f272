//! Forwarding rule types.

use serde::{Deserialize, Serialize};

use crate::proxy::tcp::PoolSettings;
use crate::proxy::udp::UdpSettings;

/// Top-level configuration: the `forward` rule list plus tuning knobs
/// shared by all forwarders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardConfig {
    /// Forwarding rules.
    pub forward: Vec<ForwardRule>,

    /// TCP connection pool settings.
    #[serde(default)]
    pub pool: PoolSettings,

    /// UDP session settings.
    #[serde(default)]
    pub udp: UdpSettings,
}

/// A declarative forwarding rule.
///
/// A rule carries either a single `localPort`/`targetPort` pair or two
/// equal-length inclusive port ranges. A range rule expands to one
/// forwarder per offset, mapping `localStart + i` to `targetStart + i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRule {
    /// Stable rule identifier, unique across the configuration.
    pub id: u32,

    /// Optional human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// Whether the rule is bound at startup.
    #[serde(default)]
    pub status: RuleStatus,

    /// Forwarded protocol.
    #[serde(rename = "type")]
    pub protocol: Protocol,

    /// Local bind host.
    #[serde(default = "default_local_host")]
    pub local_host: String,

    /// Upstream host (IP literal or resolvable name).
    pub target_host: String,

    /// Local port for a single-port rule.
    #[serde(default)]
    pub local_port: Option<u16>,

    /// Target port for a single-port rule.
    #[serde(default)]
    pub target_port: Option<u16>,

    /// Inclusive local port range `[start, end]` for a range rule.
    #[serde(default)]
    pub local_port_range: Option<[u16; 2]>,

    /// Inclusive target port range `[start, end]` for a range rule.
    #[serde(default)]
    pub target_port_range: Option<[u16; 2]>,
}

fn default_local_host() -> String {
    "0.0.0.0".to_string()
}

impl ForwardRule {
    /// Validate the rule and expand it into `(local, target)` port pairs.
    ///
    /// # Errors
    ///
    /// Returns [`crate::config::ConfigError::InvalidRule`] if the rule
    /// mixes single-port and range forms, has an inverted range, or has
    /// ranges of unequal length.
    pub fn mappings(&self) -> super::error::ConfigResult<Vec<PortMap>> {
        super::validation::expand_rule(self)
    }
}

/// Rule status. Inactive rules are loaded but never bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// The rule is bound at startup.
    #[default]
    Active,

    /// The rule is ignored.
    Inactive,
}

/// Forwarded protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP stream forwarding through a connection pool.
    Tcp,

    /// UDP datagram forwarding through a session table.
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// One `(local port, target port)` pair derived from a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMap {
    /// Port the forwarder listens on.
    pub local_port: u16,

    /// Port the forwarder relays to on the target host.
    pub target_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_port_rule() {
        let json = r#"{
            "id": 1,
            "name": "web",
            "status": "active",
            "type": "tcp",
            "localHost": "127.0.0.1",
            "targetHost": "10.0.0.5",
            "localPort": 8080,
            "targetPort": 80
        }"#;

        let rule: ForwardRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.id, 1);
        assert_eq!(rule.name.as_deref(), Some("web"));
        assert_eq!(rule.status, RuleStatus::Active);
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.local_port, Some(8080));
        assert_eq!(rule.target_port, Some(80));
        assert!(rule.local_port_range.is_none());
    }

    #[test]
    fn test_parse_range_rule() {
        let json = r#"{
            "id": 2,
            "status": "inactive",
            "type": "udp",
            "targetHost": "upstream.internal",
            "localPortRange": [29171, 29173],
            "targetPortRange": [8001, 8003]
        }"#;

        let rule: ForwardRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.status, RuleStatus::Inactive);
        assert_eq!(rule.protocol, Protocol::Udp);
        assert_eq!(rule.local_host, "0.0.0.0");
        assert_eq!(rule.local_port_range, Some([29171, 29173]));
        assert_eq!(rule.target_port_range, Some([8001, 8003]));
    }

    #[test]
    fn test_status_defaults_to_active() {
        let json = r#"{
            "id": 3,
            "type": "tcp",
            "targetHost": "127.0.0.1",
            "localPort": 1000,
            "targetPort": 2000
        }"#;

        let rule: ForwardRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.status, RuleStatus::Active);
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let json = r#"{
            "id": 4,
            "type": "sctp",
            "targetHost": "127.0.0.1",
            "localPort": 1000,
            "targetPort": 2000
        }"#;

        assert!(serde_json::from_str::<ForwardRule>(json).is_err());
    }

    #[test]
    fn test_config_defaults() {
        let json = r#"{"forward": []}"#;
        let config: ForwardConfig = serde_json::from_str(json).unwrap();
        assert!(config.forward.is_empty());
        assert_eq!(config.pool.max_pool_size, 50);
        assert_eq!(config.udp.client_timeout_secs, 300);
    }
}
