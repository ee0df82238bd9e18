//! Enrichment capability ports.
//!
//! Each lookup is an independent capability; a failure leaves the
//! corresponding enrichment field absent and never aborts the phase.
//! The null implementations are used when no provider is wired.

use async_trait::async_trait;

use crate::domain::error::PipelineError;
use crate::domain::models::{GeoInfo, StructuredData, ThreatIntelMatch, VulnInfo};

/// Threat-intel indicator lookup.
#[async_trait]
pub trait ThreatIntelLookup: Send + Sync {
    async fn lookup(&self, data: &StructuredData)
        -> Result<Option<ThreatIntelMatch>, PipelineError>;
}

/// GeoIP lookup for the event's source address.
#[async_trait]
pub trait GeoIpLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<Option<GeoInfo>, PipelineError>;
}

/// Known-vulnerability lookup.
#[async_trait]
pub trait VulnLookup: Send + Sync {
    async fn lookup(&self, data: &StructuredData) -> Result<Option<VulnInfo>, PipelineError>;
}

/// AI-generated insight for an event.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(&self, data: &StructuredData) -> Result<Option<String>, PipelineError>;
}

/// No-op lookup used when no enrichment provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEnrichment;

impl NullEnrichment {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ThreatIntelLookup for NullEnrichment {
    async fn lookup(
        &self,
        _data: &StructuredData,
    ) -> Result<Option<ThreatIntelMatch>, PipelineError> {
        Ok(None)
    }
}

#[async_trait]
impl GeoIpLookup for NullEnrichment {
    async fn lookup(&self, _ip: &str) -> Result<Option<GeoInfo>, PipelineError> {
        Ok(None)
    }
}

#[async_trait]
impl VulnLookup for NullEnrichment {
    async fn lookup(&self, _data: &StructuredData) -> Result<Option<VulnInfo>, PipelineError> {
        Ok(None)
    }
}

#[async_trait]
impl InsightGenerator for NullEnrichment {
    async fn generate(&self, _data: &StructuredData) -> Result<Option<String>, PipelineError> {
        Ok(None)
    }
}
