//! Realtime monitor: metrics collection and observer fan-out.
//!
//! Every collection interval the monitor snapshots each registered
//! connector (`get_metrics` + `health_check`), appends to a bounded
//! per-connector history ring, and broadcasts deltas to every connected
//! observer. Sinks that fail to accept a message are removed; a keep-alive
//! probe flushes dead sinks even when the system is quiet.

use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connectors::Connector;
use crate::domain::models::config::MonitorConfig;
use crate::domain::models::{MetricsSnapshot, RealtimeMessage, RealtimeMessageKind};
use crate::services::event_bus::{BusPayload, EventBus};
use crate::services::registry::ConnectorRegistry;

/// Events per minute between two adjacent history points; 0 with fewer
/// than two points or a non-positive uptime delta.
pub fn throughput_between(
    prev_events: u64,
    prev_uptime_secs: u64,
    now_events: u64,
    now_uptime_secs: u64,
) -> f64 {
    if now_uptime_secs <= prev_uptime_secs || now_events < prev_events {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let minutes = (now_uptime_secs - prev_uptime_secs) as f64 / 60.0;
    #[allow(clippy::cast_precision_loss)]
    let events = (now_events - prev_events) as f64;
    events / minutes
}

struct ObserverSink {
    id: Uuid,
    tx: mpsc::Sender<RealtimeMessage>,
}

/// Realtime monitor.
pub struct RealtimeMonitor {
    registry: Arc<ConnectorRegistry>,
    bus: Arc<EventBus>,
    config: MonitorConfig,
    histories: Mutex<HashMap<String, VecDeque<MetricsSnapshot>>>,
    sinks: Mutex<Vec<ObserverSink>>,
    running: AtomicBool,
}

impl RealtimeMonitor {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        bus: Arc<EventBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            config,
            histories: Mutex::new(HashMap::new()),
            sinks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Attach an observer. The receiver immediately gets an
    /// `initial_state` message with the latest snapshot per connector.
    pub fn subscribe(&self) -> mpsc::Receiver<RealtimeMessage> {
        let (tx, rx) = mpsc::channel(64);
        let initial = RealtimeMessage {
            kind: RealtimeMessageKind::InitialState,
            connector_id: None,
            data: json!({ "connectors": self.latest_snapshots() }),
            timestamp: Utc::now(),
        };
        let _ = tx.try_send(initial);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ObserverSink { id: Uuid::new_v4(), tx });
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Latest snapshot per connector.
    pub fn latest_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|ring| ring.back().cloned())
            .collect()
    }

    /// Full retained history for one connector.
    pub fn history(&self, connector_id: &str) -> Vec<MetricsSnapshot> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connector_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send to every sink, dropping the ones that fail.
    fn broadcast(&self, message: &RealtimeMessage) {
        let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        sinks.retain(|sink| {
            let delivered = sink.tx.try_send(message.clone()).is_ok();
            if !delivered {
                debug!(observer = %sink.id, "removing unresponsive observer");
            }
            delivered
        });
    }

    /// One collection pass over every registered connector.
    pub async fn collect_once(&self) {
        let now = Utc::now();
        for connector in self.registry.all() {
            let metrics = connector.metrics();
            let healthy = connector.health_check().await;
            let connector_id = connector.id().to_string();

            let throughput = {
                let histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
                histories
                    .get(&connector_id)
                    .and_then(|ring| ring.back())
                    .map_or(0.0, |prev| {
                        throughput_between(
                            prev.metrics.events_processed,
                            prev.metrics.uptime_secs,
                            metrics.events_processed,
                            metrics.uptime_secs,
                        )
                    })
            };

            let snapshot = MetricsSnapshot {
                connector_id: connector_id.clone(),
                name: connector.name().to_string(),
                connector_type: connector.connector_type(),
                status: connector.status(),
                healthy,
                metrics,
                throughput,
                collected_at: now,
            };

            {
                let mut histories =
                    self.histories.lock().unwrap_or_else(PoisonError::into_inner);
                let ring = histories.entry(connector_id.clone()).or_default();
                ring.push_back(snapshot.clone());
                while ring.len() > self.config.history_len {
                    ring.pop_front();
                }
            }

            self.broadcast(&RealtimeMessage {
                kind: RealtimeMessageKind::ConnectorMetrics,
                connector_id: Some(connector_id),
                data: serde_json::to_value(&snapshot).unwrap_or_default(),
                timestamp: now,
            });
        }
    }

    fn relay_bus_event(&self, payload: &BusPayload) {
        let message = match payload {
            BusPayload::StatusChanged { connector_id, from, to, message } => Some(RealtimeMessage {
                kind: RealtimeMessageKind::ConnectorStatus,
                connector_id: Some(connector_id.clone()),
                data: json!({ "from": from, "to": to, "message": message }),
                timestamp: Utc::now(),
            }),
            BusPayload::AutoDisabled { connector_id, error_count } => Some(RealtimeMessage {
                kind: RealtimeMessageKind::ConnectorStatus,
                connector_id: Some(connector_id.clone()),
                data: json!({ "to": "disabled", "reason": "auto-disabled", "errorCount": error_count }),
                timestamp: Utc::now(),
            }),
            BusPayload::EventEmitted { connector_id, event_id, source } => Some(RealtimeMessage {
                kind: RealtimeMessageKind::NewEvent,
                connector_id: Some(connector_id.clone()),
                data: json!({ "eventId": event_id, "source": source }),
                timestamp: Utc::now(),
            }),
            BusPayload::AlertCreated(created) => Some(RealtimeMessage {
                kind: RealtimeMessageKind::NewEvent,
                connector_id: None,
                data: serde_json::to_value(created).unwrap_or_default(),
                timestamp: Utc::now(),
            }),
            BusPayload::ConnectorErrored { connector_id, error } => Some(RealtimeMessage {
                kind: RealtimeMessageKind::Error,
                connector_id: Some(connector_id.clone()),
                data: json!({ "error": error }),
                timestamp: Utc::now(),
            }),
            _ => None,
        };
        if let Some(message) = message {
            self.broadcast(&message);
        }
    }

    /// Start the collection loop, the bus relay, and the keep-alive probe.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let mut handles = Vec::with_capacity(3);

        let monitor = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let interval = Duration::from_secs(monitor.config.poll_interval_secs);
            info!("realtime monitor started");
            while monitor.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                monitor.collect_once().await;
            }
        }));

        let monitor = Arc::clone(self);
        let mut bus_rx = self.bus.subscribe();
        handles.push(tokio::spawn(async move {
            while monitor.running.load(Ordering::SeqCst) {
                match bus_rx.recv().await {
                    Ok(event) => monitor.relay_bus_event(&event.payload),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "monitor lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let monitor = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let interval = Duration::from_secs(monitor.config.keepalive_secs);
            while monitor.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                monitor.broadcast(&RealtimeMessage {
                    kind: RealtimeMessageKind::Keepalive,
                    connector_id: None,
                    data: json!({}),
                    timestamp: Utc::now(),
                });
            }
        }));

        handles
    }

    /// Stop the loops and drop every sink.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_requires_two_points() {
        assert_eq!(throughput_between(0, 0, 0, 0), 0.0);
        assert_eq!(throughput_between(10, 60, 10, 60), 0.0);
    }

    #[test]
    fn test_throughput_events_per_minute() {
        // 30 events over 60 seconds = 30 events/min.
        let t = throughput_between(10, 60, 40, 120);
        assert!((t - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_throughput_guards_counter_resets() {
        assert_eq!(throughput_between(100, 60, 40, 120), 0.0);
        assert_eq!(throughput_between(10, 120, 40, 60), 0.0);
    }
}
