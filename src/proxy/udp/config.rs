//! UDP forwarder settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by all UDP forwarders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UdpSettings {
    /// Sessions idle longer than this are evicted.
    pub client_timeout_secs: u64,

    /// Cadence of the idle-eviction sweep.
    pub sweep_interval_secs: u64,

    /// Kernel send/receive buffer hint in bytes, best-effort.
    pub socket_buffer_bytes: usize,

    /// Receive buffer size per socket read; bounds the largest relayed
    /// datagram.
    pub max_datagram_bytes: usize,
}

impl Default for UdpSettings {
    fn default() -> Self {
        Self {
            client_timeout_secs: 300,
            sweep_interval_secs: 60,
            socket_buffer_bytes: 64 * 1024,
            max_datagram_bytes: 64 * 1024,
        }
    }
}

impl UdpSettings {
    /// Idle eviction threshold as a [`Duration`].
    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    /// Sweep cadence as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = UdpSettings::default();
        assert_eq!(settings.client_timeout(), Duration::from_secs(300));
        assert_eq!(settings.sweep_interval(), Duration::from_secs(60));
        assert_eq!(settings.socket_buffer_bytes, 65536);
    }

    #[test]
    fn test_deserialize_partial() {
        let settings: UdpSettings =
            serde_json::from_str(r#"{"clientTimeoutSecs": 1}"#).unwrap();
        assert_eq!(settings.client_timeout_secs, 1);
        assert_eq!(settings.sweep_interval_secs, 60);
    }
}
