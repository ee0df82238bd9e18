//! Integration tests for the event pipeline phases.

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use common::MemoryStore;
use sentinel::domain::error::PipelineError;
use sentinel::domain::models::{RawEvent, Severity, StructuredData, ThreatIntelMatch};
use sentinel::domain::ports::{NullEnrichment, ThreatIntelLookup};
use sentinel::services::event_bus::{BusPayload, EventBus, Topic};
use sentinel::services::pipeline::{EventPipeline, PipelineOutcome};

fn syslog_event(severity: u8, message: &str) -> RawEvent {
    RawEvent::new(
        "syslog",
        "syslog",
        json!({
            "facility": 0,
            "severity": severity,
            "message": message,
            "sourceIp": "192.0.2.7",
        }),
    )
    .with_connector("1", "org-1")
}

fn pipeline_over(store: Arc<MemoryStore>) -> (EventPipeline, Arc<EventBus>) {
    let bus = Arc::new(EventBus::default());
    (
        EventPipeline::with_null_enrichments(store, bus.clone()),
        bus,
    )
}

#[tokio::test]
async fn critical_event_persists_alert_and_notifies() {
    let store = Arc::new(MemoryStore::new());
    let (pipeline, bus) = pipeline_over(store.clone());
    let mut rx = bus.subscribe();

    let outcome = pipeline
        .process(&syslog_event(2, "critical disk failure"))
        .await
        .unwrap();
    let PipelineOutcome::Persisted { alert_id } = outcome else {
        panic!("expected a persisted alert");
    };

    let alerts = store.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    let (stored_id, alert) = &alerts[0];
    assert_eq!(*stored_id, alert_id);
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.source, "syslog");
    assert_eq!(alert.source_ip.as_deref(), Some("192.0.2.7"));
    assert_eq!(alert.organization_id.as_deref(), Some("org-1"));
    drop(alerts);

    // Exactly one alert.created with the matching id.
    let mut created = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.topic == Topic::Alert {
            created.push(event);
        }
    }
    assert_eq!(created.len(), 1);
    match &created[0].payload {
        BusPayload::AlertCreated(payload) => {
            assert_eq!(payload.alert_id, alert_id);
            assert_eq!(payload.severity, Severity::Critical);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn info_event_persists_without_notification() {
    let store = Arc::new(MemoryStore::new());
    let (pipeline, bus) = pipeline_over(store.clone());
    let mut rx = bus.subscribe();

    pipeline
        .process(&syslog_event(6, "routine rotation"))
        .await
        .unwrap();

    assert_eq!(store.alert_count(), 1);
    while let Ok(event) = rx.try_recv() {
        assert_ne!(event.topic, Topic::Alert, "info alerts must not notify");
    }
}

#[tokio::test]
async fn validation_failure_discards_without_retry() {
    let store = Arc::new(MemoryStore::new());
    let (pipeline, bus) = pipeline_over(store.clone());
    let mut rx = bus.subscribe();

    let mut event = syslog_event(2, "bad");
    event.source = String::new();

    let outcome = pipeline.process(&event).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Discarded);
    assert_eq!(store.alert_count(), 0);
    assert_eq!(pipeline.stats().validation_failures, 1);

    let mut discarded = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event.payload, BusPayload::EventDiscarded { .. }) {
            discarded += 1;
        }
    }
    assert_eq!(discarded, 1);
}

#[tokio::test]
async fn parse_failure_falls_back_to_generic_and_still_persists() {
    let store = Arc::new(MemoryStore::new());
    let (pipeline, _bus) = pipeline_over(store.clone());

    // Cloudwatch without a message cannot be typed-parsed.
    let event = RawEvent::new("cloudwatch", "cloudwatch", json!({"logGroup": "/app"}))
        .with_connector("1", "org-1");
    let outcome = pipeline.process(&event).await.unwrap();

    assert!(matches!(outcome, PipelineOutcome::Persisted { .. }));
    assert_eq!(pipeline.stats().parse_fallbacks, 1);
    assert_eq!(store.alert_count(), 1);
}

#[tokio::test]
async fn title_truncates_at_one_hundred_characters() {
    let store = Arc::new(MemoryStore::new());
    let (pipeline, _bus) = pipeline_over(store.clone());

    let long_message = "x".repeat(250);
    pipeline.process(&syslog_event(4, &long_message)).await.unwrap();

    let alerts = store.alerts.lock().unwrap();
    let (_, alert) = &alerts[0];
    assert_eq!(alert.title.chars().count(), 100);
    assert_eq!(alert.description.len(), 250);
}

struct FixedThreatIntel;

#[async_trait]
impl ThreatIntelLookup for FixedThreatIntel {
    async fn lookup(
        &self,
        _data: &StructuredData,
    ) -> Result<Option<ThreatIntelMatch>, PipelineError> {
        Ok(Some(ThreatIntelMatch {
            indicator: "192.0.2.7".to_string(),
            indicator_type: "ip".to_string(),
            threat_type: "botnet".to_string(),
            confidence: 0.9,
            source_feed: Some("test-feed".to_string()),
        }))
    }
}

#[tokio::test]
async fn threat_intel_match_is_recorded() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let null = Arc::new(NullEnrichment::new());
    let pipeline = EventPipeline::new(
        store.clone(),
        bus,
        Arc::new(FixedThreatIntel),
        null.clone(),
        null.clone(),
        null,
    );

    pipeline
        .process(&syslog_event(3, "connection from known bad host"))
        .await
        .unwrap();

    assert_eq!(store.alert_count(), 1);
    let intel = store.threat_intel.lock().unwrap();
    assert_eq!(intel.len(), 1);
    assert_eq!(intel[0].indicator, "192.0.2.7");
    assert_eq!(intel[0].source, "test-feed");
}

#[tokio::test]
async fn structured_payload_bypasses_parsing() {
    let store = Arc::new(MemoryStore::new());
    let (pipeline, _bus) = pipeline_over(store.clone());

    let event = RawEvent::new(
        "edr",
        "edr-telemetry",
        json!({
            "structured": true,
            "data": {
                "timestamp": "2025-10-01T12:00:00Z",
                "severity": "high",
                "source": "edr",
                "message": "injection observed",
                "data": {},
            },
        }),
    )
    .with_connector("1", "org-1");

    pipeline.process(&event).await.unwrap();
    let alerts = store.alerts.lock().unwrap();
    let (_, alert) = &alerts[0];
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.source, "edr");
    assert_eq!(alert.title, "injection observed");
}
