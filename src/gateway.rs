//! Gateway lifecycle: bind every active rule at boot, stop everything
//! on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::binder::bind_rule;
use crate::config::{ForwardConfig, RuleStatus};
use crate::forwarder::{Forwarder, StatsRegistry};

/// Owns the running forwarders of one configuration.
///
/// Startup binds each active rule independently: an invalid rule is
/// logged and skipped without affecting the others. Shutdown is
/// idempotent and leaves no listener accepting and no session socket
/// open.
pub struct Gateway {
    forwarders: Vec<Arc<dyn Forwarder>>,
    registry: Arc<StatsRegistry>,
    stopped: AtomicBool,
}

impl Gateway {
    /// Bind all active rules and register the resulting forwarders.
    pub async fn start(config: &ForwardConfig) -> Self {
        let registry = Arc::new(StatsRegistry::new());
        let mut forwarders: Vec<Arc<dyn Forwarder>> = Vec::new();

        for rule in &config.forward {
            if rule.status == RuleStatus::Inactive {
                debug!(rule = rule.id, "Skipping inactive rule");
                continue;
            }

            match bind_rule(rule, &config.pool, &config.udp).await {
                Ok(bound) => {
                    for forwarder in bound {
                        registry.register(Arc::clone(&forwarder));
                        forwarders.push(forwarder);
                    }
                },
                Err(e) => {
                    error!(rule = rule.id, error = %e, "Skipping invalid rule");
                },
            }
        }

        info!(forwarders = forwarders.len(), "Gateway started");

        Self {
            forwarders,
            registry,
            stopped: AtomicBool::new(false),
        }
    }

    /// The registry observers poll for statistics.
    #[must_use]
    pub fn registry(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.registry)
    }

    /// Number of running forwarders.
    #[must_use]
    pub fn forwarder_count(&self) -> usize {
        self.forwarders.len()
    }

    /// Look up a forwarder by id.
    #[must_use]
    pub fn forwarder(&self, id: &str) -> Option<Arc<dyn Forwarder>> {
        self.registry.get(id)
    }

    /// Stop every forwarder and unregister it. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down gateway");
        for forwarder in &self.forwarders {
            forwarder.stop().await;
            self.registry.unregister(forwarder.id());
        }
        info!("Gateway stopped");
    }
}
