//! Event pipeline: validation, typed parsing, enrichment, persistence.
//!
//! Runs on the worker that dequeued the job. Phase failures are local:
//! validation discards, parsing falls back to the generic parser, a failed
//! enrichment leaves its field absent. Only store failures propagate so the
//! queue can retry.

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::domain::error::PipelineError;
use crate::domain::models::{
    AlertStatus, EnrichedData, Enrichments, NewAlert, NewThreatIntel, RawEvent, Severity,
    StructuredData,
};
use crate::domain::ports::{
    GeoIpLookup, InsightGenerator, Store, ThreatIntelLookup, VulnLookup,
};
use crate::services::event_bus::{BusPayload, EventBus};
use crate::services::parsers;

/// Fixed response-time table keyed on severity.
///
/// Pure function of its inputs; the event type is accepted for parity with
/// callers that thread it through but does not affect the result today.
pub fn recommended_action(severity: Severity, _event_type: &str) -> Option<String> {
    match severity {
        Severity::Critical => {
            Some("Immediate isolation and investigation required".to_string())
        }
        Severity::High => Some("Investigate within 1 hour".to_string()),
        Severity::Medium => Some("Review within 24 hours".to_string()),
        Severity::Low => Some("Routine review".to_string()),
        Severity::Info => None,
    }
}

/// What processing one event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Exactly one alert was persisted.
    Persisted { alert_id: i64 },
    /// Validation rejected the event; it is consumed, not retried.
    Discarded,
}

/// Pipeline counters, exposed for observability.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PipelineStats {
    pub processed: u64,
    pub validation_failures: u64,
    pub parse_fallbacks: u64,
    pub alerts_persisted: u64,
}

/// The event pipeline.
pub struct EventPipeline {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    threat_intel: Arc<dyn ThreatIntelLookup>,
    geoip: Arc<dyn GeoIpLookup>,
    vuln: Arc<dyn VulnLookup>,
    insight: Arc<dyn InsightGenerator>,
    processed: AtomicU64,
    validation_failures: AtomicU64,
    parse_fallbacks: AtomicU64,
    alerts_persisted: AtomicU64,
}

impl EventPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        threat_intel: Arc<dyn ThreatIntelLookup>,
        geoip: Arc<dyn GeoIpLookup>,
        vuln: Arc<dyn VulnLookup>,
        insight: Arc<dyn InsightGenerator>,
    ) -> Self {
        Self {
            store,
            bus,
            threat_intel,
            geoip,
            vuln,
            insight,
            processed: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            parse_fallbacks: AtomicU64::new(0),
            alerts_persisted: AtomicU64::new(0),
        }
    }

    /// Construct a pipeline with no enrichment providers wired.
    pub fn with_null_enrichments(store: Arc<dyn Store>, bus: Arc<EventBus>) -> Self {
        let null = Arc::new(crate::domain::ports::NullEnrichment::new());
        Self::new(
            store,
            bus,
            null.clone(),
            null.clone(),
            null.clone(),
            null,
        )
    }

    /// Run all four phases for one raw event.
    ///
    /// `Err` is returned only for store failures; the queue retries those.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process(&self, event: &RawEvent) -> Result<PipelineOutcome, PipelineError> {
        self.processed.fetch_add(1, Ordering::Relaxed);

        // Phase 1: validation.
        if let Err(reason) = event.validate() {
            self.validation_failures.fetch_add(1, Ordering::Relaxed);
            self.bus.publish(BusPayload::EventDiscarded {
                connector_id: event.metadata.connector_id.clone(),
                reason: reason.clone(),
            });
            debug!(%reason, "event discarded by validation");
            return Ok(PipelineOutcome::Discarded);
        }

        // Phase 2: typed parsing with generic fallback.
        let structured = match parsers::parse_event(event) {
            Ok(structured) => structured,
            Err(err) => {
                self.parse_fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "typed parse failed, using generic parser");
                parsers::parse_generic(event)
            }
        };

        // Phase 3: enrichment, each capability independent and best-effort.
        let enriched = self.enrich(&event.event_type, structured).await;

        // Phase 4: persistence.
        let alert_id = self.persist(event, enriched).await?;
        Ok(PipelineOutcome::Persisted { alert_id })
    }

    async fn enrich(&self, event_type: &str, structured: StructuredData) -> EnrichedData {
        let mut enrichments = Enrichments::default();

        match self.threat_intel.lookup(&structured).await {
            Ok(found) => enrichments.threat_intel = found,
            Err(err) => debug!(error = %err, "threat intel lookup failed"),
        }

        if let Some(ip) = structured.source_ip.clone() {
            match self.geoip.lookup(&ip).await {
                Ok(found) => enrichments.geo = found,
                Err(err) => debug!(error = %err, "geoip lookup failed"),
            }
        }

        match self.vuln.lookup(&structured).await {
            Ok(found) => enrichments.vulnerability = found,
            Err(err) => debug!(error = %err, "vulnerability lookup failed"),
        }

        let insight = match self.insight.generate(&structured).await {
            Ok(insight) => insight,
            Err(err) => {
                debug!(error = %err, "insight generation failed");
                None
            }
        };

        let action = recommended_action(structured.severity, event_type);
        EnrichedData {
            structured,
            enrichments,
            context: None,
            recommended_action: action,
            insight,
        }
    }

    async fn persist(
        &self,
        event: &RawEvent,
        enriched: EnrichedData,
    ) -> Result<i64, PipelineError> {
        let severity = enriched.structured.severity;
        let organization_id = event.metadata.organization_id.clone();
        let source = enriched.structured.source.clone();

        let alert = NewAlert {
            title: NewAlert::title_from_message(&enriched.structured.message),
            description: enriched.structured.message.clone(),
            severity,
            source: source.clone(),
            source_ip: enriched.structured.source_ip.clone(),
            destination_ip: enriched.structured.destination_ip.clone(),
            timestamp: enriched.structured.timestamp,
            status: AlertStatus::New,
            organization_id: organization_id.clone(),
            metadata: json!({
                "rawEvent": event,
                "enriched": &enriched,
            }),
        };

        let alert_id = self.store.create_alert(&alert).await?;
        self.alerts_persisted.fetch_add(1, Ordering::Relaxed);

        // Threat-intel matches become intel records too; best effort.
        if let Some(intel) = &enriched.enrichments.threat_intel {
            let record = NewThreatIntel {
                indicator: intel.indicator.clone(),
                indicator_type: intel.indicator_type.clone(),
                threat_type: intel.threat_type.clone(),
                confidence: intel.confidence,
                source: intel
                    .source_feed
                    .clone()
                    .unwrap_or_else(|| source.clone()),
                first_seen: enriched.structured.timestamp,
                organization_id: organization_id.clone(),
            };
            if let Err(err) = self.store.create_threat_intel(&record).await {
                warn!(error = %err, "failed to record threat intel match");
            }
        }

        if severity.is_notifiable() {
            self.bus
                .publish_alert_created(alert_id, severity, source, organization_id);
        }
        Ok(alert_id)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            processed: self.processed.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            parse_fallbacks: self.parse_fallbacks.load(Ordering::Relaxed),
            alerts_persisted: self.alerts_persisted.load(Ordering::Relaxed),
        }
    }
}
