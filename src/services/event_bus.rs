//! In-process publish/subscribe event bus.
//!
//! Broadcast-based with sequence numbering and named topics. The bus carries
//! notifications between components that must not hold direct references to
//! each other (registry → pipeline, connectors → monitor); event payload
//! processing itself goes through the job queue, never through the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{AlertCreated, ConnectorStatus, RawEvent, Severity};

/// Unique identifier for a bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned at publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

/// Named topics observers can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Connector,
    Alert,
    Queue,
    System,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connector => "connector",
            Self::Alert => "alert",
            Self::Queue => "queue",
            Self::System => "system",
        }
    }
}

/// Typed payloads carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BusPayload {
    /// A connector was added to the registry; late-starting components
    /// attach their listeners on this.
    ConnectorRegistered {
        connector_id: String,
        organization_id: String,
    },
    ConnectorUnregistered {
        connector_id: String,
    },
    /// `set_status` produced a state change.
    StatusChanged {
        connector_id: String,
        from: ConnectorStatus,
        to: ConnectorStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Error streak reached the quarantine threshold.
    AutoDisabled {
        connector_id: String,
        error_count: u32,
    },
    ConfigUpdated {
        connector_id: String,
    },
    ConnectorStarted {
        connector_id: String,
    },
    ConnectorStopped {
        connector_id: String,
    },
    ConnectorErrored {
        connector_id: String,
        error: String,
    },
    /// An adapter emitted a raw event (notification only; the event itself
    /// travels through the job queue).
    EventEmitted {
        connector_id: String,
        event_id: Uuid,
        source: String,
    },
    /// A webhook payload was rejected before emission.
    SignatureRejected {
        connector_id: String,
        path: String,
    },
    /// A high-severity alert was persisted.
    AlertCreated(AlertCreated),
    /// An event was discarded by pipeline validation.
    EventDiscarded {
        connector_id: Option<String>,
        reason: String,
    },
}

impl BusPayload {
    pub const fn topic(&self) -> Topic {
        match self {
            Self::ConnectorRegistered { .. }
            | Self::ConnectorUnregistered { .. }
            | Self::StatusChanged { .. }
            | Self::AutoDisabled { .. }
            | Self::ConfigUpdated { .. }
            | Self::ConnectorStarted { .. }
            | Self::ConnectorStopped { .. }
            | Self::ConnectorErrored { .. }
            | Self::EventEmitted { .. }
            | Self::SignatureRejected { .. } => Topic::Connector,
            Self::AlertCreated(_) => Topic::Alert,
            Self::EventDiscarded { .. } => Topic::System,
        }
    }
}

/// One event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub topic: Topic,
    pub payload: BusPayload,
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the broadcast channel; lagged receivers drop oldest.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// Broadcast pub/sub bus.
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self { sender, sequence: AtomicU64::new(0) }
    }

    /// Publish a payload; the topic is derived from the payload variant.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, payload: BusPayload) -> BusEvent {
        let event = BusEvent {
            id: EventId::new(),
            sequence: SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst)),
            timestamp: Utc::now(),
            topic: payload.topic(),
            payload,
        };
        // Err means no receivers are currently subscribed.
        let _ = self.sender.send(event.clone());
        event
    }

    /// Convenience: publish the secondary notification for a persisted alert.
    pub fn publish_alert_created(
        &self,
        alert_id: i64,
        severity: Severity,
        source: String,
        organization_id: Option<String>,
    ) {
        self.publish(BusPayload::AlertCreated(AlertCreated {
            alert_id,
            severity,
            source,
            organization_id,
        }));
    }

    /// Convenience: notify that an adapter emitted a raw event.
    pub fn publish_event_emitted(&self, connector_id: &str, event: &RawEvent) {
        self.publish(BusPayload::EventEmitted {
            connector_id: connector_id.to_string(),
            event_id: event.id,
            source: event.source.clone(),
        });
    }

    /// Subscribe to all events. Filter by topic at the receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_assigns_monotone_sequence() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(BusPayload::ConnectorRegistered {
            connector_id: "1".to_string(),
            organization_id: "org".to_string(),
        });
        bus.publish(BusPayload::ConnectorStarted { connector_id: "1".to_string() });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(first.topic, Topic::Connector);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(BusPayload::ConnectorStopped { connector_id: "9".to_string() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_alert_topic() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish_alert_created(42, Severity::High, "syslog".to_string(), None);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, Topic::Alert);
        match event.payload {
            BusPayload::AlertCreated(created) => {
                assert_eq!(created.alert_id, 42);
                assert_eq!(created.severity, Severity::High);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
