//! Endpoint-agent domain model.
//!
//! Agents are fleet endpoints that register against an agent connector,
//! heartbeat their vitals, and push event batches through the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered and heartbeating.
    Active,
    /// Registered but awaiting operator approval.
    Inactive,
    /// No heartbeat within the expected interval.
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Offline => "offline",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Vitals reported with each heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub cpu: f64,
    pub memory: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_space: Option<f64>,
}

/// Persisted agent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: Uuid,
    pub connector_id: i64,
    pub organization_id: String,
    pub hostname: String,
    pub ip_address: String,
    pub operating_system: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_info: Option<Value>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_metrics: Option<AgentMetrics>,
}

impl AgentRecord {
    /// Whether the agent heartbeated within `window_secs` of `now`.
    pub fn is_alive(&self, now: DateTime<Utc>, window_secs: u64) -> bool {
        self.last_heartbeat.is_some_and(|hb| {
            let elapsed = (now - hb).num_seconds();
            elapsed >= 0 && elapsed as u64 <= window_secs
        })
    }
}
