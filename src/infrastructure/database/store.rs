//! `SqliteStore`: the Store port over sqlx.
//!
//! Row structs deserialize with runtime `query_as`; JSON columns
//! (configuration, cursor state, capabilities, metrics) are serde blobs.
//! Filters are always explicit AND conjunctions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::StoreError;
use crate::domain::models::{
    AgentMetrics, AgentRecord, AgentStatus, ConnectorPatch, ConnectorRecord, ConnectorStatus,
    ConnectorType, CursorState, NewAlert, NewThreatIntel,
};
use crate::domain::ports::{ConnectorFilter, Store};

/// Store implementation over a `SQLite` pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ConnectorRow {
    id: i64,
    organization_id: String,
    name: String,
    vendor: String,
    #[sqlx(rename = "type")]
    connector_type: String,
    is_active: i64,
    status: String,
    configuration: String,
    last_successful_connection: Option<String>,
    next_run: Option<String>,
    error_count: i64,
    last_error: Option<String>,
    cursor_state: String,
}

const CONNECTOR_COLUMNS: &str = "id, organization_id, name, vendor, type, is_active, status, \
     configuration, last_successful_connection, next_run, error_count, last_error, cursor_state";

impl ConnectorRow {
    fn into_record(self) -> Result<ConnectorRecord, StoreError> {
        let connector_type = ConnectorType::from_str(&self.connector_type).ok_or_else(|| {
            StoreError::Serialization(format!("unknown connector type {}", self.connector_type))
        })?;
        let status = ConnectorStatus::from_str(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("unknown connector status {}", self.status))
        })?;
        let cursor_state: CursorState = serde_json::from_str(&self.cursor_state)?;
        Ok(ConnectorRecord {
            id: self.id,
            organization_id: self.organization_id,
            name: self.name,
            vendor: self.vendor,
            connector_type,
            is_active: self.is_active != 0,
            status,
            configuration: serde_json::from_str(&self.configuration)?,
            last_successful_connection: parse_instant(self.last_successful_connection.as_deref()),
            next_run: parse_instant(self.next_run.as_deref()),
            error_count: self.error_count,
            last_error: self.last_error,
            cursor_state,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    agent_id: String,
    connector_id: i64,
    organization_id: String,
    hostname: String,
    ip_address: String,
    operating_system: String,
    version: String,
    capabilities: String,
    system_info: Option<String>,
    status: String,
    registered_at: String,
    last_heartbeat: Option<String>,
    last_metrics: Option<String>,
}

impl AgentRow {
    fn into_record(self) -> Result<AgentRecord, StoreError> {
        Ok(AgentRecord {
            agent_id: Uuid::parse_str(&self.agent_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            connector_id: self.connector_id,
            organization_id: self.organization_id,
            hostname: self.hostname,
            ip_address: self.ip_address,
            operating_system: self.operating_system,
            version: self.version,
            capabilities: serde_json::from_str(&self.capabilities)?,
            system_info: self
                .system_info
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            status: AgentStatus::from_str(&self.status).ok_or_else(|| {
                StoreError::Serialization(format!("unknown agent status {}", self.status))
            })?,
            registered_at: parse_instant(Some(&self.registered_at)).unwrap_or_else(Utc::now),
            last_heartbeat: parse_instant(self.last_heartbeat.as_deref()),
            last_metrics: self
                .last_metrics
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}

fn parse_instant(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_connectors(
        &self,
        filter: ConnectorFilter,
    ) -> Result<Vec<ConnectorRecord>, StoreError> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {CONNECTOR_COLUMNS} FROM connectors WHERE 1=1"
        ));
        if let Some(org) = &filter.organization_id {
            builder.push(" AND organization_id = ").push_bind(org.as_str());
        }
        if let Some(connector_type) = filter.connector_type {
            builder.push(" AND type = ").push_bind(connector_type.as_str());
        }
        if let Some(is_active) = filter.is_active {
            builder.push(" AND is_active = ").push_bind(i64::from(is_active));
        }
        builder.push(" ORDER BY id");

        let rows: Vec<ConnectorRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.into_iter().map(ConnectorRow::into_record).collect()
    }

    async fn get_connector(&self, id: i64) -> Result<Option<ConnectorRecord>, StoreError> {
        let row: Option<ConnectorRow> = sqlx::query_as(&format!(
            "SELECT {CONNECTOR_COLUMNS} FROM connectors WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        row.map(ConnectorRow::into_record).transpose()
    }

    async fn update_connector(&self, id: i64, patch: ConnectorPatch) -> Result<(), StoreError> {
        // Read-modify-write keeps the patch semantics simple; the runtime
        // serializes writes per connector (one worker owns a job at a time).
        let current = self
            .get_connector(id)
            .await?
            .ok_or(StoreError::RowNotFound)?;

        let status = patch.status.unwrap_or(current.status);
        let last_successful = patch
            .last_successful_connection
            .or(current.last_successful_connection);
        let next_run = patch.next_run.or(current.next_run);
        let error_count = patch.error_count.unwrap_or(current.error_count);
        let last_error = match patch.last_error {
            Some(value) => value,
            None => current.last_error,
        };
        let cursor_state = patch.cursor_state.unwrap_or(current.cursor_state);
        let configuration = patch.configuration.unwrap_or(current.configuration);
        let metrics_json = patch
            .metrics
            .map(|m| serde_json::to_string(&m))
            .transpose()?;

        let mut builder = sqlx::QueryBuilder::new("UPDATE connectors SET status = ");
        builder.push_bind(status.as_str());
        builder
            .push(", last_successful_connection = ")
            .push_bind(last_successful.map(|t| t.to_rfc3339()));
        builder
            .push(", next_run = ")
            .push_bind(next_run.map(|t| t.to_rfc3339()));
        builder.push(", error_count = ").push_bind(error_count);
        builder.push(", last_error = ").push_bind(last_error);
        builder
            .push(", cursor_state = ")
            .push_bind(serde_json::to_string(&cursor_state)?);
        builder
            .push(", configuration = ")
            .push_bind(serde_json::to_string(&configuration)?);
        if let Some(metrics) = metrics_json {
            builder.push(", metrics = ").push_bind(metrics);
        }
        builder.push(" WHERE id = ").push_bind(id);

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn create_alert(&self, alert: &NewAlert) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO alerts
             (title, description, severity, source, source_ip, destination_ip,
              timestamp, status, organization_id, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(alert.severity.as_str())
        .bind(&alert.source)
        .bind(&alert.source_ip)
        .bind(&alert.destination_ip)
        .bind(alert.timestamp.to_rfc3339())
        .bind(alert.status.as_str())
        .bind(&alert.organization_id)
        .bind(serde_json::to_string(&alert.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(result.last_insert_rowid())
    }

    async fn create_threat_intel(&self, intel: &NewThreatIntel) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO threat_intel
             (indicator, indicator_type, threat_type, confidence, source, first_seen, organization_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&intel.indicator)
        .bind(&intel.indicator_type)
        .bind(&intel.threat_type)
        .bind(intel.confidence)
        .bind(&intel.source)
        .bind(intel.first_seen.to_rfc3339())
        .bind(&intel.organization_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn create_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO agents
             (agent_id, connector_id, organization_id, hostname, ip_address,
              operating_system, version, capabilities, system_info, status,
              registered_at, last_heartbeat, last_metrics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(agent.agent_id.to_string())
        .bind(agent.connector_id)
        .bind(&agent.organization_id)
        .bind(&agent.hostname)
        .bind(&agent.ip_address)
        .bind(&agent.operating_system)
        .bind(&agent.version)
        .bind(serde_json::to_string(&agent.capabilities)?)
        .bind(
            agent
                .system_info
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(agent.status.as_str())
        .bind(agent.registered_at.to_rfc3339())
        .bind(agent.last_heartbeat.map(|t| t.to_rfc3339()))
        .bind(
            agent
                .last_metrics
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: Uuid) -> Result<Option<AgentRecord>, StoreError> {
        let row: Option<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE agent_id = ?1")
                .bind(agent_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from)?;
        row.map(AgentRow::into_record).transpose()
    }

    async fn update_agent_heartbeat(
        &self,
        agent_id: Uuid,
        at: DateTime<Utc>,
        metrics: Option<AgentMetrics>,
    ) -> Result<(), StoreError> {
        match metrics {
            Some(metrics) => {
                sqlx::query(
                    "UPDATE agents SET last_heartbeat = ?1, last_metrics = ?2 WHERE agent_id = ?3",
                )
                .bind(at.to_rfc3339())
                .bind(serde_json::to_string(&metrics)?)
                .bind(agent_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(StoreError::from)?;
            }
            None => {
                sqlx::query("UPDATE agents SET last_heartbeat = ?1 WHERE agent_id = ?2")
                    .bind(at.to_rfc3339())
                    .bind(agent_id.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::from)?;
            }
        }
        Ok(())
    }

    async fn update_agent_status(
        &self,
        agent_id: Uuid,
        status: AgentStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE agents SET status = ?1 WHERE agent_id = ?2")
            .bind(status.as_str())
            .bind(agent_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn count_active_agents(&self, connector_id: i64) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agents WHERE connector_id = ?1 AND status = 'active'",
        )
        .bind(connector_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
