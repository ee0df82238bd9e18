//! Store port.
//!
//! The alert/threat-intel persistent store is an external collaborator;
//! the runtime only sees this narrow DAO.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    AgentMetrics, AgentRecord, ConnectorPatch, ConnectorRecord, NewAlert, NewThreatIntel,
};

/// Filter criteria for listing connectors. All set fields are combined
/// with AND.
#[derive(Debug, Clone, Default)]
pub struct ConnectorFilter {
    pub organization_id: Option<String>,
    pub connector_type: Option<crate::domain::models::ConnectorType>,
    pub is_active: Option<bool>,
}

/// DAO interface for all persistence the runtime needs.
#[async_trait]
pub trait Store: Send + Sync {
    /// List connector rows matching the filter.
    async fn list_connectors(&self, filter: ConnectorFilter)
        -> Result<Vec<ConnectorRecord>, StoreError>;

    /// Get one connector row.
    async fn get_connector(&self, id: i64) -> Result<Option<ConnectorRecord>, StoreError>;

    /// Apply a partial update to a connector row.
    async fn update_connector(&self, id: i64, patch: ConnectorPatch) -> Result<(), StoreError>;

    /// Insert an alert; returns the new row id.
    async fn create_alert(&self, alert: &NewAlert) -> Result<i64, StoreError>;

    /// Insert a threat intelligence record.
    async fn create_threat_intel(&self, intel: &NewThreatIntel) -> Result<(), StoreError>;

    /// Insert a newly registered agent row.
    async fn create_agent(&self, agent: &AgentRecord) -> Result<(), StoreError>;

    /// Get one agent row.
    async fn get_agent(&self, agent_id: Uuid) -> Result<Option<AgentRecord>, StoreError>;

    /// Record a heartbeat: timestamp and (when reported) vitals in one write.
    async fn update_agent_heartbeat(
        &self,
        agent_id: Uuid,
        at: DateTime<Utc>,
        metrics: Option<AgentMetrics>,
    ) -> Result<(), StoreError>;

    /// Flip an agent's status.
    async fn update_agent_status(
        &self,
        agent_id: Uuid,
        status: crate::domain::models::AgentStatus,
    ) -> Result<(), StoreError>;

    /// Number of active agents registered to a connector.
    async fn count_active_agents(&self, connector_id: i64) -> Result<u64, StoreError>;
}
