//! Job queue domain model.
//!
//! A job is one unit of work: either a scheduler-driven poll of a pull
//! connector, or one raw event travelling through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::RawEvent;

/// Priority band for queued jobs. Higher bands are dequeued first;
/// within a band FIFO order is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Band index for the queue's internal storage (0 = critical).
    pub const fn band(&self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Critical work gets two extra attempts.
    pub const fn max_attempts(&self) -> u32 {
        match self {
            Self::Critical => 5,
            _ => 3,
        }
    }
}

/// What a job does when a worker picks it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// One `run_once` poll of the named connector.
    RunConnector,
    /// One raw event through the pipeline phases.
    ProcessEvent { event: RawEvent },
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A unit of work in the bounded priority queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: Uuid,
    pub connector_id: String,
    pub payload: JobPayload,
    /// Human-readable origin, e.g. `scheduler` or `syslog:514`.
    pub data_source: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueJob {
    pub fn new(
        connector_id: impl Into<String>,
        payload: JobPayload,
        data_source: impl Into<String>,
        priority: JobPriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connector_id: connector_id.into(),
            payload,
            data_source: data_source.into(),
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: priority.max_attempts(),
            created_at: Utc::now(),
            processing_started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Whether another attempt is allowed after a failure.
    pub const fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Wall time the last attempt took, if the job completed.
    pub fn processing_duration(&self) -> Option<chrono::Duration> {
        match (self.processing_started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_processed: u64,
    pub average_processing_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Critical > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Medium);
        assert!(JobPriority::Medium > JobPriority::Low);
    }

    #[test]
    fn test_max_attempts_by_priority() {
        assert_eq!(JobPriority::Critical.max_attempts(), 5);
        assert_eq!(JobPriority::High.max_attempts(), 3);
        assert_eq!(JobPriority::Medium.max_attempts(), 3);
        assert_eq!(JobPriority::Low.max_attempts(), 3);
    }

    #[test]
    fn test_band_indices_are_distinct() {
        let bands: Vec<usize> = [
            JobPriority::Critical,
            JobPriority::High,
            JobPriority::Medium,
            JobPriority::Low,
        ]
        .iter()
        .map(JobPriority::band)
        .collect();
        assert_eq!(bands, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_new_job_retry_budget() {
        let job = QueueJob::new(
            "7",
            JobPayload::RunConnector,
            "scheduler",
            JobPriority::Critical,
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, 5);
        assert!(job.can_retry());

        let mut exhausted = job.clone();
        exhausted.attempts = 5;
        assert!(!exhausted.can_retry());
    }
}
