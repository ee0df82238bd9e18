//! Connector domain model.
//!
//! A connector is a configured binding of a source adapter to an
//! organization and a schedule. Its persisted row lives in the Store;
//! its live state is owned by the adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::event::Severity;

/// Number of consecutive errors after which a connector auto-quarantines.
pub const AUTO_DISABLE_THRESHOLD: u32 = 5;

/// The kind of source adapter a connector binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    /// Pull-mode adapter polling a remote API.
    Api,
    /// Push-mode adapter listening for syslog datagrams/streams.
    Syslog,
    /// Passive adapter fed by the agent HTTP surface.
    Agent,
    /// Push-mode adapter fed by inbound webhooks.
    Webhook,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Syslog => "syslog",
            Self::Agent => "agent",
            Self::Webhook => "webhook",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "api" => Some(Self::Api),
            "syslog" => Some(Self::Syslog),
            "agent" => Some(Self::Agent),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }

    /// Pull connectors take schedule ticks; push connectors do not.
    pub const fn is_pull(&self) -> bool {
        matches!(self, Self::Api)
    }
}

impl std::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    /// Adapter started and healthy.
    Active,
    /// Adapter stopped by an operator; resources released.
    Paused,
    /// Adapter started but its last unit of work failed.
    Error,
    /// Quarantined after an error streak, or disabled by an operator.
    Disabled,
}

impl Default for ConnectorStatus {
    fn default() -> Self {
        Self::Paused
    }
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Whether the adapter has been started and not stopped.
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Active | Self::Error)
    }

    /// Whether the scheduler should keep issuing poll ticks.
    pub const fn is_schedulable(&self) -> bool {
        matches!(self, Self::Active | Self::Error)
    }
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sub-source resumption token for a pull adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCursor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_timestamp: Option<DateTime<Utc>>,
}

/// Opaque resumption state persisted per pull connector.
///
/// For a single-endpoint connector the top-level fields are the cursor.
/// With multiple endpoints each sub-source keeps its own cursor under
/// `sources` and the top-level `last_event_timestamp` is the maximum across
/// them. `last_event_timestamp` is monotone: once advanced past T it is
/// never rewound by normal operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, SourceCursor>,
}

impl CursorState {
    /// Cursor for one sub-source. Falls back to the top-level fields so a
    /// state written by a single-endpoint run resumes correctly.
    pub fn source(&self, name: &str) -> SourceCursor {
        self.sources.get(name).cloned().unwrap_or(SourceCursor {
            next_token: self.next_token.clone(),
            last_event_timestamp: self.last_event_timestamp,
        })
    }

    /// Record a sub-source cursor after a successful batch.
    ///
    /// The pagination token is replaced with whatever the source returned
    /// (it may be cleared); the timestamp only moves forward.
    pub fn record(&mut self, name: &str, next: SourceCursor) {
        let entry = self.sources.entry(name.to_string()).or_default();
        entry.next_token = next.next_token;
        entry.last_event_timestamp = match (entry.last_event_timestamp, next.last_event_timestamp)
        {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => new.or(old),
        };
    }

    /// Recompute the top-level cursor from the sub-sources.
    pub fn finalize(&mut self) {
        let max_ts = self
            .sources
            .values()
            .filter_map(|c| c.last_event_timestamp)
            .max();
        self.last_event_timestamp = match (self.last_event_timestamp, max_ts) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => new.or(old),
        };
        self.next_token = if self.sources.len() == 1 {
            self.sources.values().next().and_then(|c| c.next_token.clone())
        } else {
            None
        };
    }
}

/// Point-in-time counters for one connector. O(1) to read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorMetrics {
    pub events_processed: u64,
    pub bytes_processed: u64,
    pub error_count: u64,
    pub uptime_secs: u64,
    pub avg_response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Result of a side-effect-free connectivity probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

impl ConnectionTest {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Monitor's per-connector point-in-time view, including derived throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connector_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    pub status: ConnectorStatus,
    pub healthy: bool,
    pub metrics: ConnectorMetrics,
    /// Events per minute, computed from adjacent history points.
    pub throughput: f64,
    pub collected_at: DateTime<Utc>,
}

/// Persisted connector row, as the Store hands it to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: i64,
    pub organization_id: String,
    pub name: String,
    pub vendor: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    pub is_active: bool,
    pub status: ConnectorStatus,
    /// Type-specific configuration payload; validated into a
    /// [`super::connector_config::ConnectorConfig`] at construction.
    pub configuration: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_connection: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    pub error_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub cursor_state: CursorState,
}

impl ConnectorRecord {
    /// Runtime identity. Rows are integer-keyed; the runtime uses strings.
    pub fn runtime_id(&self) -> String {
        self.id.to_string()
    }
}

/// Mutable subset of the connector row written back by the runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectorStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_connection: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<i64>,
    /// `Some(None)` clears the stored error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_state: Option<CursorState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ConnectorMetrics>,
}

/// Realtime update message broadcast to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub kind: RealtimeMessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Realtime channel message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeMessageKind {
    InitialState,
    ConnectorStatus,
    ConnectorMetrics,
    NewEvent,
    Error,
    Keepalive,
}

/// Bus payload published when a high-severity alert is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCreated {
    pub alert_id: i64,
    pub severity: Severity,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ConnectorStatus::Active,
            ConnectorStatus::Paused,
            ConnectorStatus::Error,
            ConnectorStatus::Disabled,
        ] {
            assert_eq!(ConnectorStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ConnectorStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_schedulability() {
        assert!(ConnectorStatus::Active.is_schedulable());
        assert!(ConnectorStatus::Error.is_schedulable());
        assert!(!ConnectorStatus::Paused.is_schedulable());
        assert!(!ConnectorStatus::Disabled.is_schedulable());
    }

    #[test]
    fn test_cursor_single_endpoint_matches_top_level() {
        let mut cursor = CursorState::default();
        cursor.record(
            "events",
            SourceCursor {
                next_token: Some("T1".to_string()),
                last_event_timestamp: Some(ts(2000)),
            },
        );
        cursor.finalize();
        assert_eq!(cursor.next_token.as_deref(), Some("T1"));
        assert_eq!(cursor.last_event_timestamp, Some(ts(2000)));

        // Next run: empty response, no token. Token clears, timestamp holds.
        cursor.record(
            "events",
            SourceCursor { next_token: None, last_event_timestamp: None },
        );
        cursor.finalize();
        assert_eq!(cursor.next_token, None);
        assert_eq!(cursor.last_event_timestamp, Some(ts(2000)));
    }

    #[test]
    fn test_cursor_never_rewinds() {
        let mut cursor = CursorState::default();
        cursor.record(
            "a",
            SourceCursor { next_token: None, last_event_timestamp: Some(ts(5000)) },
        );
        cursor.record(
            "a",
            SourceCursor { next_token: None, last_event_timestamp: Some(ts(1000)) },
        );
        cursor.finalize();
        assert_eq!(cursor.last_event_timestamp, Some(ts(5000)));
    }

    #[test]
    fn test_cursor_multi_endpoint_aggregates_max() {
        let mut cursor = CursorState::default();
        cursor.record(
            "a",
            SourceCursor { next_token: Some("A".into()), last_event_timestamp: Some(ts(1000)) },
        );
        cursor.record(
            "b",
            SourceCursor { next_token: Some("B".into()), last_event_timestamp: Some(ts(3000)) },
        );
        cursor.finalize();
        assert_eq!(cursor.last_event_timestamp, Some(ts(3000)));
        // Ambiguous across endpoints: no top-level token.
        assert_eq!(cursor.next_token, None);
        assert_eq!(cursor.source("a").next_token.as_deref(), Some("A"));
    }

    #[test]
    fn test_source_cursor_falls_back_to_top_level() {
        let cursor = CursorState {
            next_token: Some("T9".to_string()),
            last_event_timestamp: Some(ts(900)),
            sources: BTreeMap::new(),
        };
        let sub = cursor.source("events");
        assert_eq!(sub.next_token.as_deref(), Some("T9"));
        assert_eq!(sub.last_event_timestamp, Some(ts(900)));
    }
}
