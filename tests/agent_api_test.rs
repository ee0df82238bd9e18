//! Integration tests for the passive agent connector: registration,
//! approval gating, heartbeats, and event intake.

mod common;

use serde_json::json;
use std::sync::Arc;

use common::{agent_record, MemoryStore};
use sentinel::connectors::agent::{verify_agent_token, AgentRegistration};
use sentinel::connectors::{AgentConnector, Connector};
use sentinel::domain::models::config::QueueConfig;
use sentinel::domain::models::{AgentMetrics, AgentStatus, JobPayload};
use sentinel::services::event_bus::EventBus;
use sentinel::services::job_queue::JobQueue;

const SECRET: &str = "test-secret";

fn build(
    requires_approval: bool,
) -> (Arc<MemoryStore>, Arc<JobQueue>, AgentConnector) {
    let record = agent_record(1, requires_approval);
    let store = Arc::new(MemoryStore::new());
    store
        .connectors
        .lock()
        .unwrap()
        .insert(record.id, record.clone());
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(JobQueue::new(QueueConfig::default()));
    let connector = AgentConnector::from_record(
        &record,
        SECRET.to_string(),
        365,
        store.clone(),
        bus,
        queue.clone(),
    )
    .unwrap();
    (store, queue, connector)
}

fn registration(key: &str) -> AgentRegistration {
    serde_json::from_value(json!({
        "hostname": "host-a",
        "ipAddress": "10.0.0.5",
        "operatingSystem": "linux",
        "version": "1.4.2",
        "capabilities": ["file-monitor"],
        "organizationKey": key,
    }))
    .unwrap()
}

#[tokio::test]
async fn registration_without_approval_creates_an_active_agent() {
    let (store, _queue, connector) = build(false);

    let registered = connector.register_agent(registration("org-key-1")).await.unwrap();
    let row = store.agent(registered.agent_id).unwrap();
    assert_eq!(row.status, AgentStatus::Active);
    assert_eq!(row.hostname, "host-a");

    let claims = verify_agent_token(SECRET, &registered.token).unwrap();
    assert_eq!(claims.sub, registered.agent_id.to_string());
    assert_eq!(claims.org, "org-1");
    assert_eq!(claims.connector, "1");
}

#[tokio::test]
async fn registration_with_approval_starts_inactive() {
    let (store, _queue, connector) = build(true);

    let registered = connector.register_agent(registration("org-key-1")).await.unwrap();
    let row = store.agent(registered.agent_id).unwrap();
    assert_eq!(row.status, AgentStatus::Inactive);
    // The token is still issued.
    assert!(verify_agent_token(SECRET, &registered.token).is_some());
}

#[tokio::test]
async fn registration_rejects_a_wrong_organization_key() {
    let (_store, _queue, connector) = build(false);
    assert!(!connector.matches_organization_key("wrong"));
    let err = connector.register_agent(registration("wrong")).await.unwrap_err();
    assert!(err.to_string().contains("organization key"));
}

#[tokio::test]
async fn registration_can_be_disabled() {
    let record = {
        let mut record = agent_record(1, false);
        record.configuration["registrationEnabled"] = json!(false);
        record
    };
    let store = MemoryStore::with_connector(record.clone());
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(JobQueue::new(QueueConfig::default()));
    let connector = AgentConnector::from_record(
        &record,
        SECRET.to_string(),
        365,
        store,
        bus,
        queue,
    )
    .unwrap();

    let err = connector.register_agent(registration("org-key-1")).await.unwrap_err();
    assert!(err.to_string().contains("disabled"));
}

#[tokio::test]
async fn heartbeat_updates_the_row_atomically() {
    let (store, _queue, connector) = build(false);
    let registered = connector.register_agent(registration("org-key-1")).await.unwrap();

    connector
        .process_heartbeat(
            registered.agent_id,
            AgentMetrics { cpu: 42.5, memory: 63.0, disk_space: Some(80.0) },
        )
        .await
        .unwrap();

    let row = store.agent(registered.agent_id).unwrap();
    assert!(row.last_heartbeat.is_some());
    let metrics = row.last_metrics.unwrap();
    assert!((metrics.cpu - 42.5).abs() < f64::EPSILON);
    assert_eq!(metrics.disk_space, Some(80.0));
}

#[tokio::test]
async fn pushed_events_become_tagged_raw_events() {
    let (store, queue, connector) = build(false);
    connector.start().await.unwrap();
    let registered = connector.register_agent(registration("org-key-1")).await.unwrap();

    let accepted = connector
        .process_events(
            registered.agent_id,
            vec![
                json!({"type": "process-start", "pid": 4242}),
                json!({"type": "file-change", "path": "/etc/passwd"}),
            ],
        )
        .await
        .unwrap();

    assert_eq!(accepted, 2);
    assert_eq!(queue.stats().pending, 2);
    // Delivery counts as liveness.
    assert!(store.agent(registered.agent_id).unwrap().last_heartbeat.is_some());

    // Each job carries an agent-tagged raw event.
    let job = queue.pending_jobs().into_iter().next().unwrap();
    let JobPayload::ProcessEvent { event } = job.payload else {
        panic!("expected an event job");
    };
    assert_eq!(event.source, "agent");
    assert_eq!(
        event.metadata.agent_id.as_deref(),
        Some(registered.agent_id.to_string().as_str())
    );
    assert_eq!(event.metadata.organization_id.as_deref(), Some("org-1"));
}

#[tokio::test]
async fn run_once_refreshes_the_active_agent_count() {
    let (_store, _queue, connector) = build(false);
    connector.start().await.unwrap();
    connector.register_agent(registration("org-key-1")).await.unwrap();
    connector.register_agent(registration("org-key-1")).await.unwrap();

    connector.run_once().await.unwrap();
    assert_eq!(connector.active_agent_count(), 2);

    let probe = connector.test_connection().await;
    assert!(probe.success);
    assert!(probe.message.contains('2'));
}

#[tokio::test]
async fn effective_config_merges_connector_and_row_capabilities() {
    let record = {
        let mut record = agent_record(1, false);
        record.configuration["capabilities"] = json!(["baseline"]);
        record.configuration["customConfig"] = json!({"scanDepth": 3});
        record
    };
    let store = MemoryStore::with_connector(record.clone());
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(JobQueue::new(QueueConfig::default()));
    let connector = AgentConnector::from_record(
        &record,
        SECRET.to_string(),
        365,
        store,
        bus,
        queue,
    )
    .unwrap();

    let registered = connector.register_agent(registration("org-key-1")).await.unwrap();
    let effective = connector
        .agent_effective_config(registered.agent_id)
        .await
        .unwrap();

    assert_eq!(effective.heartbeat_interval, 60);
    assert_eq!(effective.batch_size, 100);
    assert_eq!(effective.batch_time_limit, 120);
    assert!(effective.capabilities.contains(&"baseline".to_string()));
    assert!(effective.capabilities.contains(&"file-monitor".to_string()));
    assert_eq!(effective.custom_config, Some(json!({"scanDepth": 3})));
}
