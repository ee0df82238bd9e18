//! Bounded priority job queue with concurrent workers.
//!
//! Four priority bands, FIFO within a band. Enqueue is synchronous and never
//! blocks (push adapters drop on `QueueFull`); workers are long-lived tokio
//! tasks that sleep one second when the queue is empty. This is the only
//! component in the system that retries with backoff.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::error::QueueError;
use crate::domain::models::config::QueueConfig;
use crate::domain::models::{JobPriority, JobStatus, QueueJob, QueueStats};

/// Executes one dequeued job. The bootstrap wires this to the registry
/// (poll jobs) and the pipeline (event jobs).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueueJob) -> anyhow::Result<()>;
}

/// Observability events on the queue's own channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    JobQueued {
        job_id: Uuid,
        connector_id: String,
        priority: JobPriority,
    },
    JobStarted {
        job_id: Uuid,
        attempt: u32,
    },
    JobCompleted {
        job_id: Uuid,
        duration_ms: i64,
    },
    JobRetry {
        job_id: Uuid,
        attempt: u32,
        delay_ms: u64,
    },
    JobFailed {
        job_id: Uuid,
        error: String,
    },
}

#[derive(Default)]
struct QueueInner {
    /// Index 0 is critical; see [`JobPriority::band`].
    bands: [VecDeque<QueueJob>; 4],
    processing: HashMap<Uuid, QueueJob>,
    completed: HashMap<Uuid, QueueJob>,
    failed: HashMap<Uuid, QueueJob>,
}

impl QueueInner {
    fn pending(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    fn pop_highest(&mut self) -> Option<QueueJob> {
        self.bands.iter_mut().find_map(VecDeque::pop_front)
    }
}

/// Bounded priority job queue.
pub struct JobQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    events: broadcast::Sender<QueueEvent>,
    accepting: AtomicBool,
    running: AtomicBool,
    total_processed: AtomicU64,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            config,
            inner: Mutex::new(QueueInner::default()),
            events,
            accepting: AtomicBool::new(true),
            running: AtomicBool::new(true),
            total_processed: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job at the tail of its priority band.
    ///
    /// Fails with [`QueueError::Full`] at capacity; the caller owns the
    /// decision to drop or back off.
    pub fn enqueue(&self, job: QueueJob) -> Result<Uuid, QueueError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }
        let mut inner = self.lock();
        if inner.pending() >= self.config.max_queue_size {
            return Err(QueueError::Full { capacity: self.config.max_queue_size });
        }
        let job_id = job.id;
        let event = QueueEvent::JobQueued {
            job_id,
            connector_id: job.connector_id.clone(),
            priority: job.priority,
        };
        inner.bands[job.priority.band()].push_back(job);
        drop(inner);
        let _ = self.events.send(event);
        Ok(job_id)
    }

    /// Take the head of the highest non-empty band and mark it processing.
    fn try_dequeue(&self) -> Option<QueueJob> {
        let mut inner = self.lock();
        let mut job = inner.pop_highest()?;
        job.status = JobStatus::Processing;
        job.processing_started_at = Some(Utc::now());
        job.attempts += 1;
        inner.processing.insert(job.id, job.clone());
        drop(inner);
        let _ = self
            .events
            .send(QueueEvent::JobStarted { job_id: job.id, attempt: job.attempts });
        Some(job)
    }

    fn finish_success(&self, job_id: Uuid) {
        let mut inner = self.lock();
        if let Some(mut job) = inner.processing.remove(&job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            let duration_ms = job
                .processing_duration()
                .map_or(0, |d| d.num_milliseconds());
            inner.completed.insert(job_id, job);
            drop(inner);
            self.total_processed.fetch_add(1, Ordering::Relaxed);
            let _ = self.events.send(QueueEvent::JobCompleted { job_id, duration_ms });
        }
    }

    fn finish_failure(self: &Arc<Self>, job_id: Uuid, message: String) {
        let mut inner = self.lock();
        let Some(mut job) = inner.processing.remove(&job_id) else {
            return;
        };
        job.error = Some(message.clone());

        if job.can_retry() {
            let delay =
                Duration::from_secs(self.config.retry_delay_secs * u64::from(job.attempts));
            drop(inner);
            let _ = self.events.send(QueueEvent::JobRetry {
                job_id,
                attempt: job.attempts,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
            debug!(%job_id, attempt = job.attempts, ?delay, "job failed, scheduling retry");

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !queue.running.load(Ordering::SeqCst) {
                    return;
                }
                let mut job = job;
                job.status = JobStatus::Pending;
                let band = job.priority.band();
                queue.lock().bands[band].push_back(job);
            });
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            inner.failed.insert(job_id, job);
            drop(inner);
            self.total_processed.fetch_add(1, Ordering::Relaxed);
            warn!(%job_id, %message, "job failed terminally");
            let _ = self.events.send(QueueEvent::JobFailed { job_id, error: message });
        }
    }

    /// Re-queue failed jobs that still have attempts remaining.
    ///
    /// Returns the number of jobs re-queued.
    pub fn retry_failed_jobs(&self, connector_id: Option<&str>) -> usize {
        let mut inner = self.lock();
        let eligible: Vec<Uuid> = inner
            .failed
            .iter()
            .filter(|(_, job)| {
                job.can_retry()
                    && connector_id.is_none_or(|cid| job.connector_id == cid)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &eligible {
            if let Some(mut job) = inner.failed.remove(id) {
                job.status = JobStatus::Pending;
                job.error = None;
                job.completed_at = None;
                let band = job.priority.band();
                inner.bands[band].push_back(job);
            }
        }
        let count = eligible.len();
        drop(inner);
        if count > 0 {
            info!(count, "re-queued failed jobs");
        }
        count
    }

    /// Aggregate counters, including the mean processing time over retained
    /// completed jobs.
    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let durations: Vec<i64> = inner
            .completed
            .values()
            .filter_map(|job| job.processing_duration().map(|d| d.num_milliseconds()))
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };
        QueueStats {
            pending: inner.pending(),
            processing: inner.processing.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            average_processing_time_ms: average,
        }
    }

    pub fn job(&self, id: Uuid) -> Option<QueueJob> {
        let inner = self.lock();
        inner
            .processing
            .get(&id)
            .or_else(|| inner.completed.get(&id))
            .or_else(|| inner.failed.get(&id))
            .cloned()
            .or_else(|| {
                inner
                    .bands
                    .iter()
                    .flat_map(VecDeque::iter)
                    .find(|job| job.id == id)
                    .cloned()
            })
    }

    pub fn failed_jobs(&self) -> Vec<QueueJob> {
        self.lock().failed.values().cloned().collect()
    }

    /// Pending jobs in dequeue order.
    pub fn pending_jobs(&self) -> Vec<QueueJob> {
        self.lock()
            .bands
            .iter()
            .flat_map(VecDeque::iter)
            .cloned()
            .collect()
    }

    /// Subscribe to the queue's observability events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Evict completed and failed history older than the retention window.
    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(
                i64::try_from(self.config.history_retention_secs).unwrap_or(i64::MAX),
            );
        let mut inner = self.lock();
        let before = inner.completed.len() + inner.failed.len();
        inner
            .completed
            .retain(|_, job| job.completed_at.is_none_or(|at| at >= cutoff));
        inner
            .failed
            .retain(|_, job| job.completed_at.is_none_or(|at| at >= cutoff));
        before - (inner.completed.len() + inner.failed.len())
    }

    /// Spawn the worker fibers and the periodic history cleanup.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn JobHandler>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.concurrency + 1);
        for worker in 0..self.config.concurrency {
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            handles.push(tokio::spawn(async move {
                queue.worker_loop(worker, handler).await;
            }));
        }

        let queue = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let interval = Duration::from_secs(queue.config.cleanup_interval_secs);
            while queue.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                let evicted = queue.cleanup();
                if evicted > 0 {
                    debug!(evicted, "evicted stale job history");
                }
            }
        }));

        info!(workers = self.config.concurrency, "job queue workers started");
        handles
    }

    async fn worker_loop(self: Arc<Self>, worker: usize, handler: Arc<dyn JobHandler>) {
        let idle = Duration::from_secs(1);
        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let Some(job) = self.try_dequeue() else {
                tokio::time::sleep(idle).await;
                continue;
            };

            let outcome = tokio::time::timeout(job_timeout, handler.handle(&job)).await;
            match outcome {
                Ok(Ok(())) => self.finish_success(job.id),
                Ok(Err(err)) => self.finish_failure(job.id, err.to_string()),
                Err(_) => {
                    error!(worker, job_id = %job.id, "job timed out");
                    self.finish_failure(
                        job.id,
                        format!("timed out after {}s", self.config.job_timeout_secs),
                    );
                }
            }
        }
        debug!(worker, "queue worker stopped");
    }

    /// Stop accepting new jobs and wait for the backlog to drain.
    ///
    /// The wait is bounded; anything still pending afterwards is abandoned
    /// when the workers observe the stop flag.
    pub async fn shutdown(&self, max_wait: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let (pending, processing) = {
                let inner = self.lock();
                (inner.pending(), inner.processing.len())
            };
            if pending == 0 && processing == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(pending, processing, "queue drain timed out");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// True while workers should keep looping.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
