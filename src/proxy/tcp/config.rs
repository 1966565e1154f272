//! Connection pool settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the dynamic upstream connection pool.
///
/// One pool exists per `(target host, target port)` endpoint. All
/// durations are expressed in whole seconds in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Scaling never shrinks the pool below this many connections.
    pub min_pool_size: usize,

    /// Hard ceiling on concurrent established upstream connections.
    pub max_pool_size: usize,

    /// Connections dialed in parallel at construction.
    pub initial_pool_size: usize,

    /// Grow when `active / total` exceeds this ratio.
    pub scale_up_threshold: f64,

    /// Shrink when `active / total` falls below this ratio.
    pub scale_down_threshold: f64,

    /// Connections added per scale-up tick.
    pub scale_up_step: usize,

    /// Idle connections destroyed per scale-down tick.
    pub scale_down_step: usize,

    /// Maximum time to establish one upstream connection.
    pub connect_timeout_secs: u64,

    /// TCP keep-alive idle interval applied to every socket.
    pub keep_alive_secs: u64,

    /// Idle connections older than this are destroyed by the sweep.
    pub idle_timeout_secs: u64,

    /// Minimum gap between two scaling decisions.
    pub scale_interval_secs: u64,

    /// Kernel send/receive buffer hint in bytes, best-effort.
    pub socket_buffer_bytes: usize,

    /// How long an acquirer waits in the queue before giving up.
    pub acquire_timeout_secs: u64,

    /// Cadence of the scaling monitor.
    pub monitor_interval_secs: u64,

    /// Cadence of the idle-eviction sweep.
    pub sweep_interval_secs: u64,

    /// Queue entries older than this are considered orphaned.
    pub waiter_max_age_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_pool_size: 5,
            max_pool_size: 50,
            initial_pool_size: 10,
            scale_up_threshold: 0.80,
            scale_down_threshold: 0.30,
            scale_up_step: 3,
            scale_down_step: 1,
            connect_timeout_secs: 3,
            keep_alive_secs: 15,
            idle_timeout_secs: 180,
            scale_interval_secs: 5,
            socket_buffer_bytes: 128 * 1024,
            acquire_timeout_secs: 5,
            monitor_interval_secs: 10,
            sweep_interval_secs: 30,
            waiter_max_age_secs: 10,
        }
    }
}

impl PoolSettings {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Keep-alive interval as a [`Duration`].
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Idle eviction threshold as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Minimum scaling gap as a [`Duration`].
    #[must_use]
    pub fn scale_interval(&self) -> Duration {
        Duration::from_secs(self.scale_interval_secs)
    }

    /// Acquire queue timeout as a [`Duration`].
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Monitor cadence as a [`Duration`].
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// Sweep cadence as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Orphaned waiter threshold as a [`Duration`].
    #[must_use]
    pub fn waiter_max_age(&self) -> Duration {
        Duration::from_secs(self.waiter_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = PoolSettings::default();
        assert_eq!(settings.min_pool_size, 5);
        assert_eq!(settings.max_pool_size, 50);
        assert_eq!(settings.initial_pool_size, 10);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(3));
        assert_eq!(settings.idle_timeout(), Duration::from_secs(180));
        assert_eq!(settings.socket_buffer_bytes, 131072);
    }

    #[test]
    fn test_deserialize_partial() {
        let settings: PoolSettings =
            serde_json::from_str(r#"{"maxPoolSize": 5, "initialPoolSize": 0}"#).unwrap();
        assert_eq!(settings.max_pool_size, 5);
        assert_eq!(settings.initial_pool_size, 0);
        assert_eq!(settings.min_pool_size, 5);
    }
}
