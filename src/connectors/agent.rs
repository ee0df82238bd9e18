//! Passive agent-fleet connector.
//!
//! Opens no listeners of its own. The HTTP boundary invokes three
//! operations: `register_agent`, `process_heartbeat`, `process_events`.
//! Each pushed item becomes a `RawEvent` tagged `source=agent`.
//! `run_once` only refreshes the cached active-agent count.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::ConnectorError;
use crate::domain::models::{
    AgentConfig, AgentMetrics, AgentRecord, AgentStatus, ConnectionTest, ConnectorConfig,
    ConnectorPatch, ConnectorRecord, ConnectorStatus, JobPriority, RawEvent,
};
use crate::domain::ports::Store;
use crate::services::event_bus::EventBus;
use crate::services::job_queue::JobQueue;

use super::{Connector, ConnectorCore};

/// Claims carried in an agent bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTokenClaims {
    /// Agent id.
    pub sub: String,
    /// Organization the agent belongs to.
    pub org: String,
    /// Connector the agent registered against.
    pub connector: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Sign an agent bearer token with the process secret.
pub fn issue_agent_token(
    secret: &str,
    agent_id: Uuid,
    organization_id: &str,
    connector_id: &str,
    ttl_days: i64,
) -> Result<String, ConnectorError> {
    let claims = AgentTokenClaims {
        sub: agent_id.to_string(),
        org: organization_id.to_string(),
        connector: connector_id.to_string(),
        exp: (Utc::now() + chrono::Duration::days(ttl_days)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ConnectorError::AdapterUnavailable(format!("token signing failed: {e}")))
}

/// Validate a bearer token and return its claims.
pub fn verify_agent_token(secret: &str, token: &str) -> Option<AgentTokenClaims> {
    decode::<AgentTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Registration request as the HTTP boundary hands it over.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub hostname: String,
    pub ip_address: String,
    pub operating_system: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub system_info: Option<Value>,
    pub organization_key: String,
}

/// Successful registration: identity plus bearer token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistered {
    pub agent_id: Uuid,
    pub token: String,
}

/// Effective configuration served to an agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEffectiveConfig {
    pub heartbeat_interval: u64,
    pub batch_size: usize,
    pub batch_time_limit: u64,
    pub capabilities: Vec<String>,
    pub custom_config: Option<Value>,
}

/// Passive connector fed by the agent HTTP surface.
pub struct AgentConnector {
    core: Arc<ConnectorCore>,
    token_secret: String,
    token_ttl_days: i64,
    active_agents: AtomicU64,
}

impl AgentConnector {
    pub fn from_record(
        record: &ConnectorRecord,
        token_secret: String,
        token_ttl_days: i64,
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        jobs: Arc<JobQueue>,
    ) -> Result<Self, ConnectorError> {
        let config = ConnectorConfig::from_record(record)?;
        if !matches!(config, ConnectorConfig::Agent(_)) {
            return Err(ConnectorError::ConfigInvalid(
                "agent connector requires an agent configuration".to_string(),
            ));
        }
        Ok(Self {
            core: Arc::new(ConnectorCore::new(record, config, store, bus, jobs)),
            token_secret,
            token_ttl_days,
            active_agents: AtomicU64::new(0),
        })
    }

    fn agent_config(&self) -> Result<AgentConfig, ConnectorError> {
        match self.core.config() {
            ConnectorConfig::Agent(cfg) => Ok(cfg),
            _ => Err(ConnectorError::ConfigInvalid(
                "agent connector requires an agent configuration".to_string(),
            )),
        }
    }

    /// Whether this connector owns the presented organization key.
    pub fn matches_organization_key(&self, key: &str) -> bool {
        self.agent_config()
            .map(|cfg| !key.is_empty() && cfg.organization_key == key)
            .unwrap_or(false)
    }

    /// Register a new agent. With `registration_requires_approval` the row
    /// starts `inactive`; the token is issued either way.
    #[instrument(skip(self, registration), fields(connector_id = %self.core.id))]
    pub async fn register_agent(
        &self,
        registration: AgentRegistration,
    ) -> Result<AgentRegistered, ConnectorError> {
        let config = self.agent_config()?;
        if !config.registration_enabled {
            return Err(ConnectorError::ConfigInvalid(
                "agent registration is disabled".to_string(),
            ));
        }
        if config.organization_key != registration.organization_key {
            return Err(ConnectorError::ConfigInvalid(
                "invalid organization key".to_string(),
            ));
        }

        let status = if config.registration_requires_approval {
            AgentStatus::Inactive
        } else {
            AgentStatus::Active
        };

        let record = AgentRecord {
            agent_id: Uuid::new_v4(),
            connector_id: self.core.record_id,
            organization_id: self.core.organization_id.clone(),
            hostname: registration.hostname,
            ip_address: registration.ip_address,
            operating_system: registration.operating_system,
            version: registration.version,
            capabilities: registration.capabilities.unwrap_or_default(),
            system_info: registration.system_info,
            status,
            registered_at: Utc::now(),
            last_heartbeat: None,
            last_metrics: None,
        };
        self.core.store().create_agent(&record).await?;

        if status == AgentStatus::Active {
            self.active_agents.fetch_add(1, Ordering::Relaxed);
        }
        info!(agent_id = %record.agent_id, ?status, "agent registered");

        let token = issue_agent_token(
            &self.token_secret,
            record.agent_id,
            &self.core.organization_id,
            &self.core.id,
            self.token_ttl_days,
        )?;
        Ok(AgentRegistered { agent_id: record.agent_id, token })
    }

    /// Record a heartbeat: the agent row and its vitals update atomically.
    pub async fn process_heartbeat(
        &self,
        agent_id: Uuid,
        metrics: AgentMetrics,
    ) -> Result<(), ConnectorError> {
        self.core
            .store()
            .update_agent_heartbeat(agent_id, Utc::now(), Some(metrics))
            .await?;
        Ok(())
    }

    /// Convert pushed items into raw events tagged `source=agent`.
    ///
    /// Returns the number of events accepted by the queue; drops are
    /// counted in the connector metrics.
    #[instrument(skip(self, events), fields(connector_id = %self.core.id, count = events.len()))]
    pub async fn process_events(
        &self,
        agent_id: Uuid,
        events: Vec<Value>,
    ) -> Result<usize, ConnectorError> {
        // Data delivery doubles as liveness.
        self.core
            .store()
            .update_agent_heartbeat(agent_id, Utc::now(), None)
            .await?;

        let mut accepted = 0;
        for item in events {
            let event_type = item
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("agent-event")
                .to_string();
            let payload = if item.is_object() {
                item
            } else {
                json!({ "value": item })
            };
            let mut event = RawEvent::new("agent", event_type, payload)
                .with_tags(vec!["agent".to_string()])
                .with_connector(&self.core.id, &self.core.organization_id);
            event.metadata.agent_id = Some(agent_id.to_string());

            match self.core.emit(event, JobPriority::Medium) {
                Ok(()) => accepted += 1,
                Err(err) => {
                    warn!(agent_id = %agent_id, error = %err, "agent event dropped");
                }
            }
        }
        Ok(accepted)
    }

    /// Effective configuration: connector config merged with the agent row.
    pub async fn agent_effective_config(
        &self,
        agent_id: Uuid,
    ) -> Result<AgentEffectiveConfig, ConnectorError> {
        let config = self.agent_config()?;
        let row = self.core.store().get_agent(agent_id).await?;

        let mut capabilities = config.capabilities.clone().unwrap_or_default();
        if let Some(row) = &row {
            for capability in &row.capabilities {
                if !capabilities.contains(capability) {
                    capabilities.push(capability.clone());
                }
            }
        }

        Ok(AgentEffectiveConfig {
            heartbeat_interval: config.agent_heartbeat_interval,
            batch_size: config.batch_size,
            batch_time_limit: config.batch_time_limit,
            capabilities,
            custom_config: config.custom_config,
        })
    }

    /// Cached count refreshed by `run_once`.
    pub fn active_agent_count(&self) -> u64 {
        self.active_agents.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for AgentConnector {
    fn core(&self) -> &ConnectorCore {
        &self.core
    }

    async fn start(&self) -> Result<(), ConnectorError> {
        if self.core.status() == ConnectorStatus::Active {
            return Ok(());
        }
        self.core.metrics.mark_started();
        self.core.set_status(ConnectorStatus::Active, None).await
    }

    async fn stop(&self) -> Result<(), ConnectorError> {
        self.core.metrics.mark_stopped();
        self.core.set_status(ConnectorStatus::Paused, None).await
    }

    /// Refresh the cached active-agent count.
    async fn run_once(&self) -> Result<(), ConnectorError> {
        let count = self
            .core
            .store()
            .count_active_agents(self.core.record_id)
            .await?;
        self.active_agents.store(count, Ordering::Relaxed);
        self.core
            .store()
            .update_connector(
                self.core.record_id,
                ConnectorPatch {
                    metrics: Some(self.core.metrics.snapshot()),
                    ..ConnectorPatch::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn test_connection(&self) -> ConnectionTest {
        ConnectionTest::ok(format!(
            "{} active agents",
            self.active_agents.load(Ordering::Relaxed)
        ))
    }
}
