//! Source client port for pull adapters.
//!
//! Concrete source SDKs (cloud-log APIs, directory-audit APIs) live behind
//! this capability; the API connector only sees batches and cursors.

use async_trait::async_trait;

use crate::domain::error::ConnectorError;
use crate::domain::models::{EndpointSpec, RawEvent, SourceCursor};

/// One page of events from a sub-source, plus the cursor to resume from.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub events: Vec<RawEvent>,
    pub next_cursor: SourceCursor,
}

/// Capability to fetch event batches from a remote source.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the next batch for one named sub-source, resuming at `cursor`.
    ///
    /// A `RateLimited` error carries the deadline the scheduler must honor.
    async fn fetch_batch(
        &self,
        endpoint_name: &str,
        endpoint: &EndpointSpec,
        cursor: &SourceCursor,
    ) -> Result<FetchBatch, ConnectorError>;

    /// Side-effect-free reachability probe. Must never touch cursors.
    async fn probe(&self) -> Result<(), ConnectorError>;
}
