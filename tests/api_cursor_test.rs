//! Integration tests for the pull adapter: cursor semantics, pagination,
//! and per-sub-source partial failure.

mod common;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use common::{api_record, record, MemoryStore};
use sentinel::connectors::{ApiConnector, Connector};
use sentinel::domain::error::ConnectorError;
use sentinel::domain::models::config::QueueConfig;
use sentinel::domain::models::{ConnectorStatus, ConnectorType, EndpointSpec, RawEvent, SourceCursor};
use sentinel::domain::ports::{FetchBatch, SourceClient};
use sentinel::services::event_bus::EventBus;
use sentinel::services::job_queue::JobQueue;

/// Plays back a scripted sequence of batches per endpoint.
struct ScriptedClient {
    batches: Mutex<HashMap<String, VecDeque<Result<FetchBatch, ConnectorError>>>>,
}

impl ScriptedClient {
    fn new() -> Self {
        Self { batches: Mutex::new(HashMap::new()) }
    }

    fn push(&self, endpoint: &str, batch: Result<FetchBatch, ConnectorError>) {
        self.batches
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(batch);
    }
}

#[async_trait]
impl SourceClient for ScriptedClient {
    async fn fetch_batch(
        &self,
        endpoint_name: &str,
        _endpoint: &EndpointSpec,
        _cursor: &SourceCursor,
    ) -> Result<FetchBatch, ConnectorError> {
        self.batches
            .lock()
            .unwrap()
            .get_mut(endpoint_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(FetchBatch::default()))
    }

    async fn probe(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

fn event_at(millis: i64) -> RawEvent {
    let mut event = RawEvent::new("api", "audit", json!({"message": "entry"}));
    event.timestamp = Utc.timestamp_millis_opt(millis).unwrap();
    event
}

struct Rig {
    store: Arc<MemoryStore>,
    queue: Arc<JobQueue>,
    client: Arc<ScriptedClient>,
    connector: ApiConnector,
}

fn rig_with(record: sentinel::domain::models::ConnectorRecord) -> Rig {
    let store = Arc::new(MemoryStore::new());
    store
        .connectors
        .lock()
        .unwrap()
        .insert(record.id, record.clone());
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(JobQueue::new(QueueConfig::default()));
    let client = Arc::new(ScriptedClient::new());
    let connector = ApiConnector::from_record(
        &record,
        client.clone(),
        store.clone(),
        bus,
        queue.clone(),
    )
    .unwrap();
    Rig { store, queue, client, connector }
}

#[tokio::test]
async fn cursor_tracks_token_and_max_timestamp() {
    let rig = rig_with(api_record(1));
    rig.connector.start().await.unwrap();

    // First run: two events and a pagination token.
    rig.client.push(
        "default",
        Ok(FetchBatch {
            events: vec![event_at(1000), event_at(2000)],
            next_cursor: SourceCursor {
                next_token: Some("T1".to_string()),
                last_event_timestamp: None,
            },
        }),
    );
    rig.connector.run_once().await.unwrap();

    let row = rig.store.connector(1).unwrap();
    assert_eq!(row.cursor_state.next_token.as_deref(), Some("T1"));
    assert_eq!(
        row.cursor_state.last_event_timestamp,
        Some(Utc.timestamp_millis_opt(2000).unwrap())
    );
    assert_eq!(rig.queue.stats().pending, 2);

    // Second run: empty response, no token. The token clears, the
    // timestamp holds.
    rig.client.push("default", Ok(FetchBatch::default()));
    rig.connector.run_once().await.unwrap();

    let row = rig.store.connector(1).unwrap();
    assert_eq!(row.cursor_state.next_token, None);
    assert_eq!(
        row.cursor_state.last_event_timestamp,
        Some(Utc.timestamp_millis_opt(2000).unwrap())
    );
}

#[tokio::test]
async fn cursor_never_rewinds_on_late_events() {
    let rig = rig_with(api_record(1));
    rig.connector.start().await.unwrap();

    rig.client.push(
        "default",
        Ok(FetchBatch { events: vec![event_at(5000)], ..FetchBatch::default() }),
    );
    rig.connector.run_once().await.unwrap();

    rig.client.push(
        "default",
        Ok(FetchBatch { events: vec![event_at(1000)], ..FetchBatch::default() }),
    );
    rig.connector.run_once().await.unwrap();

    let row = rig.store.connector(1).unwrap();
    assert_eq!(
        row.cursor_state.last_event_timestamp,
        Some(Utc.timestamp_millis_opt(5000).unwrap())
    );
}

#[tokio::test]
async fn empty_batch_returns_success_with_zero_events() {
    let rig = rig_with(api_record(1));
    rig.connector.start().await.unwrap();

    rig.client.push("default", Ok(FetchBatch::default()));
    rig.connector.run_once().await.unwrap();

    assert_eq!(rig.queue.stats().pending, 0);
    assert_eq!(rig.connector.status(), ConnectorStatus::Active);
    assert!(rig.store.connector(1).unwrap().last_successful_connection.is_some());
}

fn multi_endpoint_record() -> sentinel::domain::models::ConnectorRecord {
    record(
        2,
        ConnectorType::Api,
        json!({
            "connectionMethod": "api",
            "endpoint": "https://logs.example.com",
            "pollingInterval": 60,
            "endpoints": {
                "audit": {"path": "/audit"},
                "flows": {"path": "/flows"},
            },
        }),
    )
}

#[tokio::test]
async fn one_failed_sub_source_does_not_abort_the_others() {
    let rig = rig_with(multi_endpoint_record());
    rig.connector.start().await.unwrap();

    rig.client.push(
        "audit",
        Ok(FetchBatch { events: vec![event_at(3000)], ..FetchBatch::default() }),
    );
    rig.client.push(
        "flows",
        Err(ConnectorError::AdapterUnavailable("boom".to_string())),
    );

    // Aggregate run fails because one sub-application failed.
    let err = rig.connector.run_once().await.unwrap_err();
    assert!(err.to_string().contains("flows"));
    assert_eq!(rig.connector.status(), ConnectorStatus::Error);

    // The healthy sub-source still emitted and advanced its cursor.
    assert_eq!(rig.queue.stats().pending, 1);
    let row = rig.store.connector(2).unwrap();
    assert_eq!(
        row.cursor_state.sources["audit"].last_event_timestamp,
        Some(Utc.timestamp_millis_opt(3000).unwrap())
    );
    assert_eq!(
        row.cursor_state.last_event_timestamp,
        Some(Utc.timestamp_millis_opt(3000).unwrap())
    );
    // Multiple endpoints: no single top-level token.
    assert_eq!(row.cursor_state.next_token, None);
}

#[tokio::test]
async fn rate_limited_source_suspends_scheduling() {
    let rig = rig_with(api_record(1));
    rig.connector.start().await.unwrap();

    let deadline = Utc::now() + chrono::Duration::seconds(120);
    rig.client.push(
        "default",
        Err(ConnectorError::RateLimited { retry_after: deadline }),
    );

    assert!(rig.connector.run_once().await.is_err());
    assert_eq!(rig.connector.core().suspended_until(), Some(deadline));
}

#[tokio::test]
async fn test_connection_never_touches_the_cursor() {
    let rig = rig_with(api_record(1));
    rig.connector.start().await.unwrap();

    let before = rig.store.connector(1).unwrap().cursor_state.clone();
    let probe = rig.connector.test_connection().await;
    assert!(probe.success);
    assert_eq!(rig.store.connector(1).unwrap().cursor_state, before);
}

#[tokio::test]
async fn successful_run_resets_the_error_streak() {
    let rig = rig_with(api_record(1));
    rig.connector.start().await.unwrap();

    rig.client.push(
        "default",
        Err(ConnectorError::AdapterUnavailable("flap".to_string())),
    );
    assert!(rig.connector.run_once().await.is_err());
    assert_eq!(rig.connector.core().error_streak(), 1);

    rig.client.push("default", Ok(FetchBatch::default()));
    rig.connector.run_once().await.unwrap();
    assert_eq!(rig.connector.core().error_streak(), 0);
    assert_eq!(rig.connector.status(), ConnectorStatus::Active);
}
