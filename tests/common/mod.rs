//! Common test utilities for integration tests
//!
//! Provides the in-memory Store, record builders, and wiring helpers used
//! across multiple integration test files.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use sentinel::domain::error::StoreError;
use sentinel::domain::models::{
    AgentMetrics, AgentRecord, AgentStatus, ConnectorPatch, ConnectorRecord, ConnectorStatus,
    ConnectorType, CursorState, NewAlert, NewThreatIntel,
};
use sentinel::domain::ports::{ConnectorFilter, Store};

/// In-memory Store used by the integration suites.
#[derive(Default)]
pub struct MemoryStore {
    pub connectors: Mutex<HashMap<i64, ConnectorRecord>>,
    pub alerts: Mutex<Vec<(i64, NewAlert)>>,
    pub threat_intel: Mutex<Vec<NewThreatIntel>>,
    pub agents: Mutex<HashMap<Uuid, AgentRecord>>,
    next_alert_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { next_alert_id: AtomicI64::new(1), ..Self::default() }
    }

    pub fn with_connector(record: ConnectorRecord) -> Arc<Self> {
        let store = Self::new();
        store.connectors.lock().unwrap().insert(record.id, record);
        Arc::new(store)
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn connector(&self, id: i64) -> Option<ConnectorRecord> {
        self.connectors.lock().unwrap().get(&id).cloned()
    }

    pub fn agent(&self, agent_id: Uuid) -> Option<AgentRecord> {
        self.agents.lock().unwrap().get(&agent_id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_connectors(
        &self,
        filter: ConnectorFilter,
    ) -> Result<Vec<ConnectorRecord>, StoreError> {
        let mut records: Vec<ConnectorRecord> = self
            .connectors
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                filter
                    .organization_id
                    .as_ref()
                    .is_none_or(|org| &r.organization_id == org)
                    && filter.connector_type.is_none_or(|t| r.connector_type == t)
                    && filter.is_active.is_none_or(|a| r.is_active == a)
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn get_connector(&self, id: i64) -> Result<Option<ConnectorRecord>, StoreError> {
        Ok(self.connectors.lock().unwrap().get(&id).cloned())
    }

    async fn update_connector(&self, id: i64, patch: ConnectorPatch) -> Result<(), StoreError> {
        let mut connectors = self.connectors.lock().unwrap();
        let record = connectors.get_mut(&id).ok_or(StoreError::RowNotFound)?;
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(at) = patch.last_successful_connection {
            record.last_successful_connection = Some(at);
        }
        if let Some(at) = patch.next_run {
            record.next_run = Some(at);
        }
        if let Some(count) = patch.error_count {
            record.error_count = count;
        }
        if let Some(last_error) = patch.last_error {
            record.last_error = last_error;
        }
        if let Some(cursor) = patch.cursor_state {
            record.cursor_state = cursor;
        }
        if let Some(configuration) = patch.configuration {
            record.configuration = configuration;
        }
        Ok(())
    }

    async fn create_alert(&self, alert: &NewAlert) -> Result<i64, StoreError> {
        let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst);
        self.alerts.lock().unwrap().push((id, alert.clone()));
        Ok(id)
    }

    async fn create_threat_intel(&self, intel: &NewThreatIntel) -> Result<(), StoreError> {
        self.threat_intel.lock().unwrap().push(intel.clone());
        Ok(())
    }

    async fn create_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        self.agents
            .lock()
            .unwrap()
            .insert(agent.agent_id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, agent_id: Uuid) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self.agents.lock().unwrap().get(&agent_id).cloned())
    }

    async fn update_agent_heartbeat(
        &self,
        agent_id: Uuid,
        at: DateTime<Utc>,
        metrics: Option<AgentMetrics>,
    ) -> Result<(), StoreError> {
        let mut agents = self.agents.lock().unwrap();
        let agent = agents.get_mut(&agent_id).ok_or(StoreError::RowNotFound)?;
        agent.last_heartbeat = Some(at);
        if metrics.is_some() {
            agent.last_metrics = metrics;
        }
        Ok(())
    }

    async fn update_agent_status(
        &self,
        agent_id: Uuid,
        status: AgentStatus,
    ) -> Result<(), StoreError> {
        let mut agents = self.agents.lock().unwrap();
        let agent = agents.get_mut(&agent_id).ok_or(StoreError::RowNotFound)?;
        agent.status = status;
        Ok(())
    }

    async fn count_active_agents(&self, connector_id: i64) -> Result<u64, StoreError> {
        Ok(self
            .agents
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.connector_id == connector_id && a.status == AgentStatus::Active)
            .count() as u64)
    }
}

/// Connector row builder with a given configuration payload.
pub fn record(
    id: i64,
    connector_type: ConnectorType,
    configuration: Value,
) -> ConnectorRecord {
    ConnectorRecord {
        id,
        organization_id: "org-1".to_string(),
        name: format!("test-{}", connector_type.as_str()),
        vendor: "test".to_string(),
        connector_type,
        is_active: true,
        status: ConnectorStatus::Paused,
        configuration,
        last_successful_connection: None,
        next_run: None,
        error_count: 0,
        last_error: None,
        cursor_state: CursorState::default(),
    }
}

pub fn api_record(id: i64) -> ConnectorRecord {
    record(
        id,
        ConnectorType::Api,
        json!({
            "connectionMethod": "api",
            "endpoint": "https://logs.example.com",
            "pollingInterval": 60,
        }),
    )
}

pub fn syslog_record(id: i64, port: u16) -> ConnectorRecord {
    record(
        id,
        ConnectorType::Syslog,
        json!({
            "connectionMethod": "syslog",
            "protocol": "udp",
            "host": "127.0.0.1",
            "port": port,
        }),
    )
}

pub fn agent_record(id: i64, requires_approval: bool) -> ConnectorRecord {
    record(
        id,
        ConnectorType::Agent,
        json!({
            "connectionMethod": "agent",
            "organizationKey": "org-key-1",
            "registrationEnabled": true,
            "registrationRequiresApproval": requires_approval,
        }),
    )
}

pub fn webhook_record(id: i64, path: &str, verify: bool) -> ConnectorRecord {
    let mut configuration = json!({
        "connectionMethod": "webhook",
        "path": path,
        "verifySignature": verify,
    });
    if verify {
        configuration["signatureHeader"] = json!("x-signature");
        configuration["signatureSecret"] = json!("s3cret");
    }
    record(id, ConnectorType::Webhook, configuration)
}
