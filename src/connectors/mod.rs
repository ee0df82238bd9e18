//! Connector contract and shared connector state.
//!
//! Every connector exposes the same lifecycle regardless of how its source
//! adapter supplies events. The shared [`ConnectorCore`] owns status, cursor
//! state, metrics, and the auto-quarantine state machine; adapters embed it
//! and add their per-protocol behavior.

pub mod agent;
pub mod api;
pub mod syslog;
pub mod webhook;

pub use agent::AgentConnector;
pub use api::ApiConnector;
pub use syslog::SyslogConnector;
pub use webhook::WebhookConnector;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{info, warn};

use crate::domain::error::{ConnectorError, QueueError};
use crate::domain::models::{
    ConnectionTest, ConnectorConfig, ConnectorMetrics, ConnectorPatch, ConnectorRecord,
    ConnectorStatus, ConnectorType, CursorState, JobPayload, JobPriority, QueueJob, RawEvent,
    AUTO_DISABLE_THRESHOLD,
};
use crate::domain::ports::Store;
use crate::services::event_bus::{BusPayload, EventBus};
use crate::services::job_queue::JobQueue;

/// The uniform connector contract.
///
/// Accessors and the status machine are provided through [`ConnectorCore`];
/// adapters implement the lifecycle and their unit of work.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Shared state; every adapter embeds exactly one core.
    fn core(&self) -> &ConnectorCore;

    /// Idempotent transition to `active`; acquires adapter resources.
    async fn start(&self) -> Result<(), ConnectorError>;

    /// Transition to `paused`; releases adapter resources. Safe from any state.
    async fn stop(&self) -> Result<(), ConnectorError>;

    /// One unit of work: a poll for pull adapters, a stats refresh for push.
    async fn run_once(&self) -> Result<(), ConnectorError>;

    /// Side-effect-free probe. Must never mutate cursor state.
    async fn test_connection(&self) -> ConnectionTest;

    /// Liveness as the monitor sees it.
    async fn health_check(&self) -> bool {
        self.core().status() == ConnectorStatus::Active
    }

    fn id(&self) -> &str {
        &self.core().id
    }

    fn organization_id(&self) -> &str {
        &self.core().organization_id
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    fn connector_type(&self) -> ConnectorType {
        self.core().connector_type
    }

    fn status(&self) -> ConnectorStatus {
        self.core().status()
    }

    /// O(1) snapshot of the connector's counters.
    fn metrics(&self) -> ConnectorMetrics {
        self.core().metrics.snapshot()
    }

    /// Merge a partial configuration, persist it, and emit `config-updated`.
    ///
    /// The connector type cannot change. Listener-shaped adapters pick up
    /// address changes on their next start.
    async fn update_config(&self, partial: Value) -> Result<(), ConnectorError> {
        self.core().merge_config(partial).await
    }

    /// Status transition with the error-counter logic (see [`ConnectorCore::set_status`]).
    async fn set_status(
        &self,
        status: ConnectorStatus,
        message: Option<String>,
    ) -> Result<(), ConnectorError> {
        self.core().set_status(status, message).await
    }
}

/// Atomic counters behind `get_metrics`.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    events_processed: AtomicU64,
    bytes_processed: AtomicU64,
    error_count: AtomicU64,
    response_time_total_ms: AtomicU64,
    response_time_samples: AtomicU64,
    accumulated_uptime_secs: AtomicU64,
    started_at: RwLock<Option<Instant>>,
    last_event_at: RwLock<Option<DateTime<Utc>>>,
}

impl MetricsRecorder {
    pub fn record_event(&self, bytes: u64) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
        if let Ok(mut last) = self.last_event_at.write() {
            *last = Some(Utc::now());
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, millis: u64) {
        self.response_time_total_ms.fetch_add(millis, Ordering::Relaxed);
        self.response_time_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_started(&self) {
        if let Ok(mut started) = self.started_at.write() {
            if started.is_none() {
                *started = Some(Instant::now());
            }
        }
    }

    pub fn mark_stopped(&self) {
        if let Ok(mut started) = self.started_at.write() {
            if let Some(at) = started.take() {
                self.accumulated_uptime_secs
                    .fetch_add(at.elapsed().as_secs(), Ordering::Relaxed);
            }
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        let live = self
            .started_at
            .read()
            .ok()
            .and_then(|g| g.map(|at| at.elapsed().as_secs()))
            .unwrap_or(0);
        self.accumulated_uptime_secs.load(Ordering::Relaxed) + live
    }

    pub fn snapshot(&self) -> ConnectorMetrics {
        let samples = self.response_time_samples.load(Ordering::Relaxed);
        let avg = if samples == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.response_time_total_ms.load(Ordering::Relaxed) as f64 / samples as f64
            }
        };
        ConnectorMetrics {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            uptime_secs: self.uptime_secs(),
            avg_response_time_ms: avg,
            last_event_at: self.last_event_at.read().ok().and_then(|g| *g),
        }
    }
}

/// Shared state every adapter embeds.
///
/// Lock discipline: the std locks here are held only for field access and
/// never across await points.
pub struct ConnectorCore {
    pub id: String,
    pub record_id: i64,
    pub organization_id: String,
    pub name: String,
    pub connector_type: ConnectorType,
    pub metrics: MetricsRecorder,
    status: RwLock<ConnectorStatus>,
    config: RwLock<ConnectorConfig>,
    cursor: RwLock<CursorState>,
    last_error: RwLock<Option<String>>,
    last_successful_connection: RwLock<Option<DateTime<Utc>>>,
    /// Rate-limit deadline; the scheduler skips ticks until it passes.
    suspended_until: RwLock<Option<DateTime<Utc>>>,
    error_streak: AtomicU32,
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    jobs: Arc<JobQueue>,
}

impl ConnectorCore {
    pub fn new(
        record: &ConnectorRecord,
        config: ConnectorConfig,
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        jobs: Arc<JobQueue>,
    ) -> Self {
        Self {
            id: record.runtime_id(),
            record_id: record.id,
            organization_id: record.organization_id.clone(),
            name: record.name.clone(),
            connector_type: record.connector_type,
            metrics: MetricsRecorder::default(),
            status: RwLock::new(record.status),
            config: RwLock::new(config),
            cursor: RwLock::new(record.cursor_state.clone()),
            last_error: RwLock::new(record.last_error.clone()),
            last_successful_connection: RwLock::new(record.last_successful_connection),
            suspended_until: RwLock::new(None),
            error_streak: AtomicU32::new(u32::try_from(record.error_count).unwrap_or(0)),
            store,
            bus,
            jobs,
        }
    }

    pub fn status(&self) -> ConnectorStatus {
        self.status.read().map_or(ConnectorStatus::Error, |s| *s)
    }

    pub fn config(&self) -> ConnectorConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn cursor(&self) -> CursorState {
        self.cursor
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|e| e.clone())
    }

    pub fn last_successful_connection(&self) -> Option<DateTime<Utc>> {
        self.last_successful_connection.read().ok().and_then(|t| *t)
    }

    pub fn error_streak(&self) -> u32 {
        self.error_streak.load(Ordering::SeqCst)
    }

    pub fn suspended_until(&self) -> Option<DateTime<Utc>> {
        self.suspended_until.read().ok().and_then(|t| *t)
    }

    pub fn suspend_until(&self, deadline: DateTime<Utc>) {
        if let Ok(mut until) = self.suspended_until.write() {
            *until = Some(deadline);
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Status transition with the quarantine counter logic.
    ///
    /// A change is emitted as `status-change` and persisted. Setting `error`
    /// increments the streak; at [`AUTO_DISABLE_THRESHOLD`] the connector is
    /// quarantined (`disabled`, reason `auto-disabled`) and `auto-disabled`
    /// is emitted exactly once per streak. Setting `active` clears the
    /// streak and the stored error.
    pub async fn set_status(
        &self,
        status: ConnectorStatus,
        message: Option<String>,
    ) -> Result<(), ConnectorError> {
        let mut next = Some((status, message));
        while let Some((new_status, message)) = next.take() {
            let previous = {
                let mut guard = self
                    .status
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let previous = *guard;
                *guard = new_status;
                previous
            };

            let mut patch = ConnectorPatch::default();
            if previous != new_status {
                self.bus.publish(BusPayload::StatusChanged {
                    connector_id: self.id.clone(),
                    from: previous,
                    to: new_status,
                    message: message.clone(),
                });
                patch.status = Some(new_status);
            }

            match new_status {
                ConnectorStatus::Error => {
                    if let Ok(mut last) = self.last_error.write() {
                        last.clone_from(&message);
                    }
                    self.metrics.record_error();
                    let streak = self.error_streak.fetch_add(1, Ordering::SeqCst) + 1;
                    patch.error_count = Some(i64::from(streak));
                    patch.last_error = Some(message.clone());

                    if streak >= AUTO_DISABLE_THRESHOLD {
                        if streak == AUTO_DISABLE_THRESHOLD {
                            warn!(
                                connector_id = %self.id,
                                streak, "error streak reached threshold, quarantining"
                            );
                            self.bus.publish(BusPayload::AutoDisabled {
                                connector_id: self.id.clone(),
                                error_count: streak,
                            });
                        }
                        next = Some((
                            ConnectorStatus::Disabled,
                            Some("auto-disabled".to_string()),
                        ));
                    }
                }
                ConnectorStatus::Active => {
                    self.error_streak.store(0, Ordering::SeqCst);
                    if let Ok(mut last) = self.last_error.write() {
                        *last = None;
                    }
                    patch.error_count = Some(0);
                    patch.last_error = Some(None);
                }
                ConnectorStatus::Paused | ConnectorStatus::Disabled => {}
            }

            self.store.update_connector(self.record_id, patch).await?;
        }
        Ok(())
    }

    /// Record a successful unit of work: timestamp, response time, streak reset.
    pub async fn record_run_success(&self, elapsed_ms: u64) -> Result<(), ConnectorError> {
        let now = Utc::now();
        if let Ok(mut last) = self.last_successful_connection.write() {
            *last = Some(now);
        }
        self.metrics.record_response_time(elapsed_ms);
        self.set_status(ConnectorStatus::Active, None).await?;
        self.store
            .update_connector(
                self.record_id,
                ConnectorPatch {
                    last_successful_connection: Some(now),
                    ..ConnectorPatch::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Advance the cursor and persist it atomically with the success timestamp.
    pub async fn commit_cursor(&self, cursor: CursorState) -> Result<(), ConnectorError> {
        {
            let mut guard = self
                .cursor
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = cursor.clone();
        }
        self.store
            .update_connector(
                self.record_id,
                ConnectorPatch {
                    cursor_state: Some(cursor),
                    last_successful_connection: Some(Utc::now()),
                    ..ConnectorPatch::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Hand an event to the job queue.
    ///
    /// Never blocks: when the queue is full the event is dropped, the error
    /// counter is incremented, and the caller decides whether to surface it.
    pub fn emit(&self, event: RawEvent, priority: JobPriority) -> Result<(), QueueError> {
        let bytes = event.approximate_size();
        let data_source = event.source.clone();
        let event_id = event.id;
        let source = event.source.clone();
        let job = QueueJob::new(
            self.id.clone(),
            JobPayload::ProcessEvent { event },
            data_source,
            priority,
        );
        match self.jobs.enqueue(job) {
            Ok(_) => {
                self.metrics.record_event(bytes);
                self.bus.publish(BusPayload::EventEmitted {
                    connector_id: self.id.clone(),
                    event_id,
                    source,
                });
                Ok(())
            }
            Err(err) => {
                self.metrics.record_error();
                Err(err)
            }
        }
    }

    /// Merge a partial configuration record into the current one.
    async fn merge_config(&self, partial: Value) -> Result<(), ConnectorError> {
        let Value::Object(partial) = partial else {
            return Err(ConnectorError::ConfigInvalid(
                "config update must be a record".to_string(),
            ));
        };

        let current = self.config();
        let mut merged = serde_json::to_value(&current)
            .map_err(|e| ConnectorError::ConfigInvalid(e.to_string()))?;
        if let Value::Object(map) = &mut merged {
            for (key, value) in partial {
                if key == "connectionMethod" {
                    let unchanged = map.get(&key) == Some(&value);
                    if !unchanged {
                        return Err(ConnectorError::ConfigInvalid(
                            "connector type cannot change".to_string(),
                        ));
                    }
                    continue;
                }
                map.insert(key, value);
            }
        }

        let updated: ConnectorConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConnectorError::ConfigInvalid(e.to_string()))?;
        updated.validate()?;

        {
            let mut guard = self
                .config
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = updated;
        }

        self.store
            .update_connector(
                self.record_id,
                ConnectorPatch { configuration: Some(merged), ..ConnectorPatch::default() },
            )
            .await?;
        self.bus
            .publish(BusPayload::ConfigUpdated { connector_id: self.id.clone() });
        info!(connector_id = %self.id, "connector configuration updated");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.connector_type)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
