//! Event domain model.
//!
//! Raw events flow out of source adapters, through the pipeline phases
//! (validation, parsing, enrichment), and end up persisted as alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Alert severity, totally ordered: critical > high > medium > low > info.
///
/// The lowercase strings are the wire format for persisted alerts and the
/// realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Fixed, total map from the syslog severity code (0-7).
    ///
    /// 0,1,2 -> critical; 3 -> high; 4 -> medium; 5 -> low; 6,7 -> info.
    /// Out-of-range codes clamp to info.
    pub const fn from_syslog(code: u8) -> Self {
        match code {
            0..=2 => Self::Critical,
            3 => Self::High,
            4 => Self::Medium,
            5 => Self::Low,
            _ => Self::Info,
        }
    }

    /// Severities at or above `high` trigger the secondary notification.
    pub const fn is_notifiable(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch context attached to a raw event by the emitting adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Set by the agent adapter for fleet-originated events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Source-specific context the adapters carry through unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Immutable message emitted by a source adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl RawEvent {
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
            tags: Vec::new(),
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_connector(mut self, connector_id: &str, organization_id: &str) -> Self {
        self.metadata.connector_id = Some(connector_id.to_string());
        self.metadata.organization_id = Some(organization_id.to_string());
        self
    }

    /// Structural validation: pipeline phase 1.
    ///
    /// A failure discards the event; it is never retried.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_nil() {
            return Err("event id must be a non-nil UUID".to_string());
        }
        if self.timestamp.timestamp() <= 0 {
            return Err("timestamp must be a valid instant".to_string());
        }
        if self.source.trim().is_empty() {
            return Err("source must be non-empty".to_string());
        }
        if self.event_type.trim().is_empty() {
            return Err("type must be non-empty".to_string());
        }
        if !self.payload.is_object() {
            return Err("payload must be a record".to_string());
        }
        if let Some(cid) = &self.metadata.connector_id {
            if cid.is_empty() {
                return Err("metadata.connectorId must be a non-empty string".to_string());
            }
        }
        if let Some(oid) = &self.metadata.organization_id {
            if oid.is_empty() {
                return Err("metadata.organizationId must be a non-empty string".to_string());
            }
        }
        Ok(())
    }

    /// Rough wire size used for byte-throughput accounting.
    pub fn approximate_size(&self) -> u64 {
        serde_json::to_vec(self).map_or(0, |v| v.len() as u64)
    }
}

/// Post-parse structured form of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredData {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<String>,
    pub message: String,
    pub data: Value,
}

/// Threat intelligence indicator match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatIntelMatch {
    pub indicator: String,
    pub indicator_type: String,
    pub threat_type: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_feed: Option<String>,
}

/// GeoIP lookup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
}

/// Known-vulnerability lookup result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnInfo {
    pub cve_id: String,
    pub cvss_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Enrichment outputs; each field stays absent when its capability fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_intel: Option<ThreatIntelMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerability: Option<VulnInfo>,
}

/// Structured data plus enrichments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedData {
    #[serde(flatten)]
    pub structured: StructuredData,
    #[serde(default)]
    pub enrichments: Enrichments,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<String>,
}

/// Lifecycle status of a persisted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }
}

/// Maximum length of a persisted alert title, in characters.
pub const ALERT_TITLE_MAX: usize = 100;

/// Alert record handed to the Store for insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: AlertStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Full raw event plus enrichments.
    pub metadata: Value,
}

impl NewAlert {
    /// Truncate a message into a title of at most [`ALERT_TITLE_MAX`] characters.
    pub fn title_from_message(message: &str) -> String {
        message.chars().take(ALERT_TITLE_MAX).collect()
    }
}

/// Threat intelligence record handed to the Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewThreatIntel {
    pub indicator: String,
    pub indicator_type: String,
    pub threat_type: String,
    pub confidence: f64,
    pub source: String,
    pub first_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn test_severity_wire_strings() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(Severity::from_str("HIGH"), Some(Severity::High));
        assert_eq!(Severity::from_str("unknown"), None);
    }

    #[test]
    fn test_syslog_map_is_total() {
        for code in 0u8..=7 {
            let expected = match code {
                0 | 1 | 2 => Severity::Critical,
                3 => Severity::High,
                4 => Severity::Medium,
                5 => Severity::Low,
                _ => Severity::Info,
            };
            assert_eq!(Severity::from_syslog(code), expected, "code {code}");
        }
        assert_eq!(Severity::from_syslog(200), Severity::Info);
    }

    #[test]
    fn test_raw_event_validate_ok() {
        let event = RawEvent::new("syslog", "syslog", json!({"message": "hi"}))
            .with_connector("7", "org-1");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_raw_event_validate_rejects() {
        let mut event = RawEvent::new("", "syslog", json!({}));
        assert!(event.validate().is_err());

        event.source = "syslog".to_string();
        event.payload = json!("not a record");
        assert!(event.validate().is_err());

        event.payload = json!({});
        event.metadata.connector_id = Some(String::new());
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_title_truncation_boundary() {
        let short = "a".repeat(100);
        assert_eq!(NewAlert::title_from_message(&short).chars().count(), 100);

        let long = "b".repeat(101);
        let title = NewAlert::title_from_message(&long);
        assert_eq!(title.chars().count(), 100);

        // Multibyte input truncates on character boundaries.
        let emoji = "🚨".repeat(120);
        assert_eq!(NewAlert::title_from_message(&emoji).chars().count(), 100);
    }
}
