//! Domain models for the ingestion core.

pub mod agent;
pub mod config;
pub mod connector;
pub mod connector_config;
pub mod event;
pub mod job;

pub use agent::{AgentMetrics, AgentRecord, AgentStatus};
pub use config::Config;
pub use connector::{
    AlertCreated, ConnectionTest, ConnectorMetrics, ConnectorPatch, ConnectorRecord,
    ConnectorStatus, ConnectorType, CursorState, MetricsSnapshot, RealtimeMessage,
    RealtimeMessageKind, SourceCursor, AUTO_DISABLE_THRESHOLD,
};
pub use connector_config::{
    AgentConfig, ApiConfig, ConnectorConfig, EndpointSpec, SyslogConfig, SyslogFilter,
    SyslogProtocol, TlsSettings, WebhookConfig, DEFAULT_POLL_INTERVAL_SECS,
};
pub use event::{
    AlertStatus, EnrichedData, Enrichments, EventMetadata, GeoInfo, NewAlert, NewThreatIntel,
    RawEvent, Severity, StructuredData, ThreatIntelMatch, VulnInfo, ALERT_TITLE_MAX,
};
pub use job::{JobPayload, JobPriority, JobStatus, QueueJob, QueueStats};
