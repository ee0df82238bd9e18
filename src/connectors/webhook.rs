//! Push-mode webhook connector.
//!
//! Registers an intake path on the HTTP boundary. With signature
//! verification enabled, an invalid signature emits an error event and the
//! payload is never emitted. Accepted payloads become raw events with
//! `source = webhook:<path>`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::domain::error::ConnectorError;
use crate::domain::models::{
    ConnectionTest, ConnectorConfig, ConnectorPatch, ConnectorRecord, ConnectorStatus,
    JobPriority, RawEvent, WebhookConfig,
};
use crate::domain::ports::{SignatureVerifier, Store};
use crate::services::event_bus::{BusPayload, EventBus};
use crate::services::job_queue::JobQueue;

use super::{Connector, ConnectorCore};

/// Why a delivery was not accepted. The HTTP boundary maps these to
/// status codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("payload is not valid JSON")]
    InvalidPayload,
    #[error("ingestion queue is full")]
    QueueFull,
    #[error("connector is not accepting deliveries")]
    NotAccepting,
}

/// Push connector fed by inbound webhooks.
pub struct WebhookConnector {
    core: Arc<ConnectorCore>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl WebhookConnector {
    pub fn from_record(
        record: &ConnectorRecord,
        verifier: Arc<dyn SignatureVerifier>,
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        jobs: Arc<JobQueue>,
    ) -> Result<Self, ConnectorError> {
        let config = ConnectorConfig::from_record(record)?;
        if !matches!(config, ConnectorConfig::Webhook(_)) {
            return Err(ConnectorError::ConfigInvalid(
                "webhook connector requires a webhook configuration".to_string(),
            ));
        }
        Ok(Self {
            core: Arc::new(ConnectorCore::new(record, config, store, bus, jobs)),
            verifier,
        })
    }

    fn webhook_config(&self) -> Result<WebhookConfig, ConnectorError> {
        match self.core.config() {
            ConnectorConfig::Webhook(cfg) => Ok(cfg),
            _ => Err(ConnectorError::ConfigInvalid(
                "webhook connector requires a webhook configuration".to_string(),
            )),
        }
    }

    /// Registered intake path.
    pub fn path(&self) -> String {
        self.webhook_config().map(|c| c.path).unwrap_or_default()
    }

    /// Header carrying the signature, when verification is enabled.
    pub fn signature_header(&self) -> Option<String> {
        self.webhook_config().ok().and_then(|c| {
            if c.verify_signature {
                c.signature_header
            } else {
                None
            }
        })
    }

    /// Accept one delivery from the HTTP boundary.
    #[instrument(skip(self, body, signature), fields(connector_id = %self.core.id))]
    pub fn handle_delivery(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), DeliveryError> {
        if self.core.status() != ConnectorStatus::Active {
            return Err(DeliveryError::NotAccepting);
        }
        let Ok(config) = self.webhook_config() else {
            return Err(DeliveryError::NotAccepting);
        };

        if config.verify_signature {
            let secret = config.signature_secret.as_deref().unwrap_or_default();
            let valid = signature
                .is_some_and(|presented| self.verifier.verify(secret, body, presented));
            if !valid {
                warn!(connector_id = %self.core.id, path = %config.path, "webhook signature rejected");
                self.core.metrics.record_error();
                self.core.bus().publish(BusPayload::SignatureRejected {
                    connector_id: self.core.id.clone(),
                    path: config.path.clone(),
                });
                return Err(DeliveryError::InvalidSignature);
            }
        }

        let payload: Value =
            serde_json::from_slice(body).map_err(|_| DeliveryError::InvalidPayload)?;
        let payload = if payload.is_object() {
            payload
        } else {
            json!({ "value": payload })
        };

        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("webhook")
            .to_string();
        let event = RawEvent::new(format!("webhook:{}", config.path), event_type, payload)
            .with_tags(vec!["webhook".to_string()])
            .with_connector(&self.core.id, &self.core.organization_id);

        self.core.emit(event, JobPriority::Medium).map_err(|err| {
            debug!(connector_id = %self.core.id, error = %err, "webhook delivery dropped");
            DeliveryError::QueueFull
        })
    }
}

#[async_trait]
impl Connector for WebhookConnector {
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

    /// Push adapter: a unit of work is a stats refresh.
    async fn run_once(&self) -> Result<(), ConnectorError> {
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
        match self.webhook_config() {
            Ok(config) => ConnectionTest::ok(format!("intake registered at {}", config.path)),
            Err(err) => ConnectionTest::failed(err.to_string()),
        }
    }
}
