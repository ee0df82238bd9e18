//! Poll scheduler for pull connectors.
//!
//! A single cooperative tick loop; no per-connector tasks. Due connectors
//! get a high-priority `run_once` job enqueued to the job queue so that
//! concurrency stays centrally bounded. `next_run` advances before the
//! enqueue, which keeps all retry logic in the queue.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connectors::Connector;
use crate::domain::error::QueueError;
use crate::domain::models::config::SchedulerConfig;
use crate::domain::models::{JobPayload, JobPriority, QueueJob};
use crate::services::job_queue::JobQueue;
use crate::services::registry::ConnectorRegistry;

#[derive(Debug, Clone)]
struct ScheduleEntry {
    interval: Duration,
    next_run: DateTime<Utc>,
}

/// Drives periodic `run_once` for pull connectors; push connectors are
/// never scheduled.
pub struct PollScheduler {
    registry: Arc<ConnectorRegistry>,
    queue: Arc<JobQueue>,
    entries: Mutex<HashMap<String, ScheduleEntry>>,
    running: AtomicBool,
    config: SchedulerConfig,
}

impl PollScheduler {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        queue: Arc<JobQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            entries: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            config,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ScheduleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connector for periodic polling; the first poll is due
    /// immediately.
    pub fn schedule_connector(&self, connector_id: &str, interval: Duration) {
        self.lock().insert(
            connector_id.to_string(),
            ScheduleEntry { interval, next_run: Utc::now() },
        );
        info!(connector_id, ?interval, "connector scheduled");
    }

    /// Replace the stored interval and recompute `next_run` from now.
    pub fn update_connector_schedule(&self, connector_id: &str, interval: Duration) {
        let next_run = Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default();
        if let Some(entry) = self.lock().get_mut(connector_id) {
            entry.interval = interval;
            entry.next_run = next_run;
        }
    }

    /// Remove a connector's schedule. In-flight jobs already in the queue
    /// run to completion.
    pub fn unschedule_connector(&self, connector_id: &str) {
        self.lock().remove(connector_id);
        debug!(connector_id, "connector unscheduled");
    }

    /// Enqueue an immediate poll at critical priority.
    pub fn run_connector_now(&self, connector_id: &str) -> Result<Uuid, QueueError> {
        self.queue.enqueue(QueueJob::new(
            connector_id,
            JobPayload::RunConnector,
            "scheduler",
            JobPriority::Critical,
        ))
    }

    /// Next scheduled poll, if any.
    pub fn next_run(&self, connector_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(connector_id).map(|e| e.next_run)
    }

    /// One scheduling pass: select everything due, advance, enqueue.
    pub fn tick(&self) {
        let now = Utc::now();
        let due: Vec<(String, Duration)> = {
            let entries = self.lock();
            entries
                .iter()
                .filter(|(_, entry)| entry.next_run <= now)
                .map(|(id, entry)| (id.clone(), entry.interval))
                .collect()
        };

        for (connector_id, interval) in due {
            let Some(connector) = self.registry.get(&connector_id) else {
                continue;
            };
            if !connector.status().is_schedulable() {
                continue;
            }
            // Rate-limit suppression: leave the entry due and try again
            // once the adapter-provided deadline passes.
            if connector
                .core()
                .suspended_until()
                .is_some_and(|until| until > now)
            {
                continue;
            }

            // Advance before enqueueing; retries belong to the queue alone.
            if let Some(entry) = self.lock().get_mut(&connector_id) {
                entry.next_run =
                    now + chrono::Duration::from_std(interval).unwrap_or_default();
            }

            let job = QueueJob::new(
                &connector_id,
                JobPayload::RunConnector,
                "scheduler",
                JobPriority::High,
            );
            if let Err(err) = self.queue.enqueue(job) {
                // Back off: make the entry due again on the next tick.
                warn!(connector_id, error = %err, "failed to enqueue poll, retrying next tick");
                if let Some(entry) = self.lock().get_mut(&connector_id) {
                    entry.next_run = now;
                }
            }
        }
    }

    /// Start the tick loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        let tick_interval = Duration::from_millis(self.config.tick_interval_ms);
        tokio::spawn(async move {
            info!("poll scheduler started");
            while scheduler.running.load(Ordering::SeqCst) {
                tokio::time::sleep(tick_interval).await;
                scheduler.tick();
            }
            info!("poll scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
