//! Domain error types for the Sentinel ingestion core
//!
//! This module defines all error types using thiserror for structured error handling.
//! Each error enum represents errors from a specific domain or infrastructure component.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by connectors and their source adapters
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Configuration failed validation at construction; the connector refuses to start
    #[error("Invalid connector configuration: {0}")]
    ConfigInvalid(String),

    /// Transient external fault (network, remote API, listener socket)
    #[error("Source adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The external source asked us to back off until the given deadline
    #[error("Rate limited until {retry_after}")]
    RateLimited { retry_after: DateTime<Utc> },

    /// Connector with the given id is not registered
    #[error("Connector not found: {0}")]
    NotFound(String),

    /// Persistence failed while updating connector state
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ConnectorError {
    /// Returns true if this error is transient and the operation could succeed on retry
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AdapterUnavailable(_) | Self::RateLimited { .. } | Self::Store(_)
        )
    }

    /// Returns true if this error is permanent (no retry)
    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors raised by the bounded priority job queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity; the caller decides whether to drop or back off
    #[error("Queue full: {capacity} jobs pending")]
    Full { capacity: usize },

    /// Enqueue attempted after shutdown began
    #[error("Queue is shutting down")]
    ShuttingDown,

    /// Job with the given id does not exist in the queue history
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),
}

/// Per-phase pipeline errors
///
/// Validation failures discard the event and are never retried. Parse and
/// enrichment failures are phase-local: the pipeline falls back to the generic
/// parser and to empty enrichments respectively. Store failures propagate so
/// the queue can retry the job.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The raw event failed structural validation; discarded, counted, never retried
    #[error("Event validation failed: {0}")]
    Validation(String),

    /// Typed parsing failed; the generic parser is used instead
    #[error("Event parsing failed: {0}")]
    Parse(String),

    /// An enrichment capability failed; the corresponding field stays absent
    #[error("Enrichment failed: {0}")]
    Enrich(String),

    /// Alert persistence failed; the job is retried per queue policy
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Only store failures are worth retrying; everything else is phase-local
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Errors from the persistence boundary (the Store DAO)
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection to the backing store could not be established
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// A query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Requested row does not exist
    #[error("Row not found")]
    RowNotFound,

    /// Row payload could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns true if this error is transient and could succeed on retry
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::QueryFailed(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::ConnectionFailed(err.to_string())
            }
            other => Self::QueryFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
