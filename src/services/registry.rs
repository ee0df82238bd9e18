//! Process-wide connector registry.
//!
//! Index of live connectors keyed by id. The registry publishes
//! `connector-registered` on the bus so late-starting components (pipeline,
//! monitor) can attach without ordering constraints; it never references
//! them directly.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::connectors::Connector;
use crate::domain::models::ConnectorType;
use crate::services::event_bus::{BusPayload, EventBus};

/// Registry of live connectors.
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
    bus: Arc<EventBus>,
}

impl ConnectorRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { connectors: RwLock::new(HashMap::new()), bus }
    }

    /// Register a connector, replacing any previous entry with the same id.
    pub fn register(&self, connector: Arc<dyn Connector>) {
        let id = connector.id().to_string();
        let organization_id = connector.organization_id().to_string();
        self.connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), connector);
        info!(connector_id = %id, "connector registered");
        self.bus.publish(BusPayload::ConnectorRegistered {
            connector_id: id,
            organization_id,
        });
    }

    /// Remove a connector. In-flight jobs already queued for it run to
    /// completion.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Connector>> {
        let removed = self
            .connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            info!(connector_id = %id, "connector unregistered");
            self.bus.publish(BusPayload::ConnectorUnregistered {
                connector_id: id.to_string(),
            });
        }
        removed
    }

    /// O(1) point lookup.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Linear scan by organization.
    pub fn get_org_connectors(&self, organization_id: &str) -> Vec<Arc<dyn Connector>> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.organization_id() == organization_id)
            .cloned()
            .collect()
    }

    /// Linear scan by adapter type.
    pub fn get_connectors_by_type(&self, connector_type: ConnectorType) -> Vec<Arc<dyn Connector>> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.connector_type() == connector_type)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<dyn Connector>> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
