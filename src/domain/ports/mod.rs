//! Ports: capability interfaces the runtime depends on.

pub mod enrichment;
pub mod signature;
pub mod source_client;
pub mod store;

pub use enrichment::{
    GeoIpLookup, InsightGenerator, NullEnrichment, ThreatIntelLookup, VulnLookup,
};
pub use signature::{HmacSha256Verifier, SignatureVerifier};
pub use source_client::{FetchBatch, SourceClient};
pub use store::{ConnectorFilter, Store};
