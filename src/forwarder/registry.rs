//! Registry of running forwarders for external observation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::contract::{Forwarder, StatsSnapshot};

/// Holds running forwarders by id so observers can poll their snapshots.
///
/// Registration keys are the forwarders' own ids. The registry never
/// drives forwarder lifecycle; it only hands out snapshots.
#[derive(Default)]
pub struct StatsRegistry {
    forwarders: RwLock<HashMap<String, Arc<dyn Forwarder>>>,
}

impl StatsRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a forwarder under its own id.
    ///
    /// Registering a second forwarder with the same id replaces the
    /// first; this indicates a duplicate rule id and is logged.
    pub fn register(&self, forwarder: Arc<dyn Forwarder>) {
        let id = forwarder.id().to_string();
        let previous = self
            .forwarders
            .write()
            .unwrap()
            .insert(id.clone(), forwarder);

        if previous.is_some() {
            warn!(proxy = %id, "Replaced existing forwarder registration");
        } else {
            debug!(proxy = %id, "Registered forwarder");
        }
    }

    /// Remove a forwarder from the registry.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Forwarder>> {
        let removed = self.forwarders.write().unwrap().remove(id);
        if removed.is_some() {
            debug!(proxy = %id, "Unregistered forwarder");
        }
        removed
    }

    /// Look up a registered forwarder.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Forwarder>> {
        self.forwarders.read().unwrap().get(id).cloned()
    }

    /// Snapshot every registered forwarder, sorted by id.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<(String, StatsSnapshot)> {
        let mut snapshots: Vec<_> = self
            .forwarders
            .read()
            .unwrap()
            .iter()
            .map(|(id, forwarder)| (id.clone(), forwarder.snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Number of registered forwarders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forwarders.read().unwrap().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forwarders.read().unwrap().is_empty()
    }
}
