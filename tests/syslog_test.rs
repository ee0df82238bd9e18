//! End-to-end syslog ingestion: UDP datagram to persisted alert.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{syslog_record, MemoryStore};
use sentinel::bootstrap::JobDispatcher;
use sentinel::connectors::{Connector, SyslogConnector};
use sentinel::domain::models::config::QueueConfig;
use sentinel::domain::models::Severity;
use sentinel::services::event_bus::{BusPayload, EventBus, Topic};
use sentinel::services::job_queue::JobQueue;
use sentinel::services::pipeline::EventPipeline;
use sentinel::services::registry::ConnectorRegistry;

struct Rig {
    store: Arc<MemoryStore>,
    bus: Arc<EventBus>,
    queue: Arc<JobQueue>,
    connector: Arc<SyslogConnector>,
}

async fn rig(port: u16, filtering: Option<serde_json::Value>) -> Rig {
    let mut record = syslog_record(1, port);
    if let Some(filtering) = filtering {
        record.configuration["filtering"] = filtering;
    }
    let store = Arc::new(MemoryStore::new());
    store
        .connectors
        .lock()
        .unwrap()
        .insert(record.id, record.clone());

    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(JobQueue::new(QueueConfig {
        concurrency: 1,
        retry_delay_secs: 0,
        ..QueueConfig::default()
    }));
    let registry = Arc::new(ConnectorRegistry::new(bus.clone()));
    let pipeline = Arc::new(EventPipeline::with_null_enrichments(
        store.clone(),
        bus.clone(),
    ));

    let connector = Arc::new(
        SyslogConnector::from_record(&record, store.clone(), bus.clone(), queue.clone()).unwrap(),
    );
    registry.register(connector.clone());
    connector.start().await.unwrap();

    let dispatcher = Arc::new(JobDispatcher::new(registry, pipeline, store.clone()));
    let _handles = queue.start(dispatcher);

    Rig { store, bus, queue, connector }
}

async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

fn send_udp(port: u16, message: &str) {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .send_to(message.as_bytes(), ("127.0.0.1", port))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn udp_critical_message_becomes_a_critical_alert() {
    let port = 18514;
    let rig = rig(port, None).await;
    let mut bus_rx = rig.bus.subscribe();

    send_udp(port, "<2>Oct 1 12:00:00 host1 app: critical disk failure");

    assert!(
        wait_until(|| rig.store.alert_count() == 1, Duration::from_secs(5)).await,
        "no alert was persisted"
    );

    let alerts = rig.store.alerts.lock().unwrap();
    let (alert_id, alert) = &alerts[0];
    let alert_id = *alert_id;
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.source, "syslog");
    assert_eq!(alert.source_ip.as_deref(), Some("127.0.0.1"));
    assert!(alert.description.contains("critical disk failure"));
    drop(alerts);

    // Exactly one alert.created with the matching id.
    let mut created = Vec::new();
    while let Ok(event) = bus_rx.try_recv() {
        if event.topic == Topic::Alert {
            if let BusPayload::AlertCreated(payload) = event.payload {
                created.push(payload);
            }
        }
    }
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].alert_id, alert_id);

    rig.connector.stop().await.unwrap();
    rig.queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn facility_filter_drops_disallowed_events() {
    let port = 18515;
    // Only facility 16 (local0) is allowed.
    let rig = rig(port, Some(serde_json::json!({"facilities": [16]}))).await;

    // Facility 0 message is dropped before emission.
    send_udp(port, "<2>Oct 1 12:00:00 host1 app: critical disk failure");
    // Facility 16 severity 3 passes: pri = 16*8+3 = 131.
    send_udp(port, "<131>Oct 1 12:00:01 host1 app: login failure");

    assert!(
        wait_until(|| rig.store.alert_count() == 1, Duration::from_secs(5)).await,
        "allowed event did not arrive"
    );
    // Give the dropped one a chance to (incorrectly) appear.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.store.alert_count(), 1);

    let alerts = rig.store.alerts.lock().unwrap();
    assert_eq!(alerts[0].1.severity, Severity::High);
    drop(alerts);

    rig.connector.stop().await.unwrap();
    rig.queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopped_listener_releases_the_port() {
    let port = 18516;
    let rig = rig(port, None).await;

    rig.connector.stop().await.unwrap();
    // Give the listener task a beat to observe the signal.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rebind = std::net::UdpSocket::bind(("127.0.0.1", port));
    assert!(rebind.is_ok(), "port should be released after stop");
    rig.queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn duplicate_bind_fails_to_start() {
    let port = 18517;
    let _holder = std::net::UdpSocket::bind(("127.0.0.1", port)).unwrap();

    let record = syslog_record(9, port);
    let store = common::MemoryStore::with_connector(record.clone());
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(JobQueue::new(QueueConfig::default()));
    let connector =
        SyslogConnector::from_record(&record, store, bus, queue).unwrap();

    let err = connector.start().await.unwrap_err();
    assert!(err.to_string().contains("bind"));
}
