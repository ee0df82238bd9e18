//! Typed connector configuration.
//!
//! The Store keeps configuration as an opaque JSON record; at construction
//! it is parsed into this tagged variant (discriminated on
//! `connectionMethod`) with per-variant validation. Unknown fields are
//! preserved in each variant's `extra` bag rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::connector::{ConnectorRecord, ConnectorType, CursorState};
use crate::domain::error::ConnectorError;

/// Default polling interval for pull connectors, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Tagged connector configuration, one variant per adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "connectionMethod", rename_all = "lowercase")]
pub enum ConnectorConfig {
    Api(ApiConfig),
    Syslog(SyslogConfig),
    Agent(AgentConfig),
    Webhook(WebhookConfig),
}

impl ConnectorConfig {
    /// Parse and validate the configuration payload of a store row.
    ///
    /// Fails with `ConfigInvalid` when the JSON does not parse, when the
    /// variant does not match the row's declared type, or when the variant's
    /// own validation rejects it.
    pub fn from_record(record: &ConnectorRecord) -> Result<Self, ConnectorError> {
        let config: Self = serde_json::from_value(record.configuration.clone())
            .map_err(|e| ConnectorError::ConfigInvalid(e.to_string()))?;
        if config.connector_type() != record.connector_type {
            return Err(ConnectorError::ConfigInvalid(format!(
                "connection method {} does not match connector type {}",
                config.connector_type(),
                record.connector_type
            )));
        }
        config.validate()?;
        Ok(config)
    }

    pub const fn connector_type(&self) -> ConnectorType {
        match self {
            Self::Api(_) => ConnectorType::Api,
            Self::Syslog(_) => ConnectorType::Syslog,
            Self::Agent(_) => ConnectorType::Agent,
            Self::Webhook(_) => ConnectorType::Webhook,
        }
    }

    /// Polling interval; only pull variants have one.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self {
            Self::Api(api) => Some(Duration::from_secs(api.polling_interval)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConnectorError> {
        match self {
            Self::Api(c) => c.validate(),
            Self::Syslog(c) => c.validate(),
            Self::Agent(c) => c.validate(),
            Self::Webhook(c) => c.validate(),
        }
    }
}

/// One named sub-application of an API connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Pull-mode API connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default)]
    pub default_headers: HashMap<String, String>,
    /// Named sub-applications polled in one run. Empty means a single
    /// default endpoint at the configured base path.
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointSpec>,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    /// Per-vendor credential bag, never interpreted by the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
    /// Resumption cursor seeded at construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CursorState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_api_key_header() -> String {
    "Authorization".to_string()
}

const fn default_polling_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl ApiConfig {
    fn validate(&self) -> Result<(), ConnectorError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConnectorError::ConfigInvalid(
                "api endpoint must be non-empty".to_string(),
            ));
        }
        if self.polling_interval == 0 {
            return Err(ConnectorError::ConfigInvalid(
                "pollingInterval must be at least 1 second".to_string(),
            ));
        }
        for (name, spec) in &self.endpoints {
            if spec.path.trim().is_empty() {
                return Err(ConnectorError::ConfigInvalid(format!(
                    "endpoint '{name}' has an empty path"
                )));
            }
        }
        Ok(())
    }
}

/// Wire protocol of a syslog listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogProtocol {
    Udp,
    Tcp,
    Tls,
}

impl SyslogProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Tls => "tls",
        }
    }
}

/// Facility/severity allow-lists; events outside either list are dropped
/// before emission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyslogFilter {
    #[serde(default)]
    pub facilities: Vec<u8>,
    #[serde(default)]
    pub severities: Vec<u8>,
}

impl SyslogFilter {
    /// True when the (facility, severity) pair passes both allow-lists.
    pub fn allows(&self, facility: u8, severity: u8) -> bool {
        (self.facilities.is_empty() || self.facilities.contains(&facility))
            && (self.severities.is_empty() || self.severities.contains(&severity))
    }
}

/// Certificate material for the TLS listener variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    pub cert_path: String,
    pub key_path: String,
}

/// Push-mode syslog connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyslogConfig {
    pub protocol: SyslogProtocol,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtering: Option<SyslogFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl SyslogConfig {
    fn validate(&self) -> Result<(), ConnectorError> {
        if self.port == 0 {
            return Err(ConnectorError::ConfigInvalid(
                "syslog port must be non-zero".to_string(),
            ));
        }
        if self.protocol == SyslogProtocol::Tls && self.tls.is_none() {
            return Err(ConnectorError::ConfigInvalid(
                "tls protocol requires certPath and keyPath".to_string(),
            ));
        }
        Ok(())
    }
}

/// Passive agent-fleet connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_true")]
    pub registration_enabled: bool,
    #[serde(default)]
    pub registration_requires_approval: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub agent_heartbeat_interval: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_time_limit")]
    pub batch_time_limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    /// Shared secret agents present at registration.
    pub organization_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_config: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

const fn default_true() -> bool {
    true
}

const fn default_heartbeat_interval() -> u64 {
    60
}

const fn default_batch_size() -> usize {
    100
}

const fn default_batch_time_limit() -> u64 {
    120
}

impl AgentConfig {
    fn validate(&self) -> Result<(), ConnectorError> {
        if self.organization_key.trim().is_empty() {
            return Err(ConnectorError::ConfigInvalid(
                "organizationKey must be non-empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConnectorError::ConfigInvalid(
                "batchSize must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Push-mode webhook connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Intake path, registered under the HTTP surface. Must start with `/`.
    pub path: String,
    #[serde(default)]
    pub verify_signature: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_secret: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WebhookConfig {
    fn validate(&self) -> Result<(), ConnectorError> {
        if !self.path.starts_with('/') {
            return Err(ConnectorError::ConfigInvalid(
                "webhook path must start with '/'".to_string(),
            ));
        }
        if self.verify_signature
            && (self.signature_header.is_none() || self.signature_secret.is_none())
        {
            return Err(ConnectorError::ConfigInvalid(
                "verifySignature requires signatureHeader and signatureSecret".to_string(),
            ));
        }
        Ok(())
    }
}
