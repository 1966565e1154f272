//! Forwarding rule validation and port-range expansion.

use super::error::{ConfigError, ConfigResult};
use super::types::{ForwardRule, PortMap};

/// Validate a rule and expand it into `(local, target)` port pairs.
///
/// A single-port rule yields exactly one pair. A range rule yields one
/// pair per offset. The two forms are mutually exclusive; for ranges,
/// both must be ordered (`start <= end`) and of equal length.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidRule`] describing the first violation.
pub fn expand_rule(rule: &ForwardRule) -> ConfigResult<Vec<PortMap>> {
    if rule.target_host.is_empty() {
        return Err(invalid(rule, "targetHost must not be empty"));
    }

    match (
        rule.local_port,
        rule.target_port,
        rule.local_port_range,
        rule.target_port_range,
    ) {
        (Some(local_port), Some(target_port), None, None) => {
            if local_port == 0 || target_port == 0 {
                return Err(invalid(rule, "ports must be in 1-65535"));
            }
            Ok(vec![PortMap {
                local_port,
                target_port,
            }])
        },
        (None, None, Some([local_start, local_end]), Some([target_start, target_end])) => {
            if local_start == 0 || target_start == 0 {
                return Err(invalid(rule, "ports must be in 1-65535"));
            }
            if local_start > local_end || target_start > target_end {
                return Err(invalid(rule, "port range start must not exceed end"));
            }
            if local_end - local_start != target_end - target_start {
                return Err(invalid(
                    rule,
                    "localPortRange and targetPortRange must have equal length",
                ));
            }
            Ok((0..=local_end - local_start)
                .map(|offset| PortMap {
                    local_port: local_start + offset,
                    target_port: target_start + offset,
                })
                .collect())
        },
        _ => Err(invalid(
            rule,
            "rule must specify either localPort/targetPort or localPortRange/targetPortRange",
        )),
    }
}

fn invalid(rule: &ForwardRule, message: &str) -> ConfigError {
    ConfigError::InvalidRule {
        id: rule.id,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Protocol;

    fn rule() -> ForwardRule {
        ForwardRule {
            id: 1,
            name: None,
            status: Default::default(),
            protocol: Protocol::Tcp,
            local_host: "127.0.0.1".to_string(),
            target_host: "127.0.0.1".to_string(),
            local_port: None,
            target_port: None,
            local_port_range: None,
            target_port_range: None,
        }
    }

    #[test]
    fn test_single_port_expands_to_one_pair() {
        let mut r = rule();
        r.local_port = Some(29171);
        r.target_port = Some(8001);

        let pairs = expand_rule(&r).unwrap();
        assert_eq!(
            pairs,
            vec![PortMap {
                local_port: 29171,
                target_port: 8001
            }]
        );
    }

    #[test]
    fn test_range_expands_by_parallel_offset() {
        let mut r = rule();
        r.local_port_range = Some([29171, 29173]);
        r.target_port_range = Some([8001, 8003]);

        let pairs = expand_rule(&r).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].local_port, 29171);
        assert_eq!(pairs[0].target_port, 8001);
        assert_eq!(pairs[2].local_port, 29173);
        assert_eq!(pairs[2].target_port, 8003);
    }

    #[test]
    fn test_length_one_range_matches_single_port() {
        let mut ranged = rule();
        ranged.local_port_range = Some([29171, 29171]);
        ranged.target_port_range = Some([8001, 8001]);

        let mut single = rule();
        single.local_port = Some(29171);
        single.target_port = Some(8001);

        assert_eq!(
            expand_rule(&ranged).unwrap(),
            expand_rule(&single).unwrap()
        );
    }

    #[test]
    fn test_unequal_range_lengths_rejected() {
        let mut r = rule();
        r.local_port_range = Some([10, 12]);
        r.target_port_range = Some([20, 21]);

        let err = expand_rule(&r).unwrap_err();
        assert!(err.to_string().contains("equal length"));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut r = rule();
        r.local_port_range = Some([12, 10]);
        r.target_port_range = Some([20, 22]);

        assert!(expand_rule(&r).is_err());
    }

    #[test]
    fn test_mixed_forms_rejected() {
        let mut r = rule();
        r.local_port = Some(29171);
        r.target_port = Some(8001);
        r.local_port_range = Some([1, 2]);
        r.target_port_range = Some([3, 4]);

        assert!(expand_rule(&r).is_err());
    }

    #[test]
    fn test_missing_ports_rejected() {
        let r = rule();
        assert!(expand_rule(&r).is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut r = rule();
        r.local_port = Some(0);
        r.target_port = Some(8001);

        assert!(expand_rule(&r).is_err());
    }

    #[test]
    fn test_empty_target_host_rejected() {
        let mut r = rule();
        r.target_host = String::new();
        r.local_port = Some(29171);
        r.target_port = Some(8001);

        assert!(expand_rule(&r).is_err());
    }
}
