//! Integration tests for the poll scheduler.

mod common;

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{webhook_record, MemoryStore};
use sentinel::connectors::{Connector, WebhookConnector};
use sentinel::domain::models::config::{QueueConfig, SchedulerConfig};
use sentinel::domain::models::{
    ConnectorStatus, JobPayload, JobPriority, QueueJob,
};
use sentinel::domain::ports::HmacSha256Verifier;
use sentinel::services::event_bus::EventBus;
use sentinel::services::job_queue::JobQueue;
use sentinel::services::registry::ConnectorRegistry;
use sentinel::services::scheduler::PollScheduler;

struct Harness {
    store: Arc<MemoryStore>,
    queue: Arc<JobQueue>,
    registry: Arc<ConnectorRegistry>,
    scheduler: Arc<PollScheduler>,
}

fn harness(queue_config: QueueConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(JobQueue::new(queue_config));
    let registry = Arc::new(ConnectorRegistry::new(bus));
    let scheduler = Arc::new(PollScheduler::new(
        registry.clone(),
        queue.clone(),
        SchedulerConfig::default(),
    ));
    Harness { store, queue, registry, scheduler }
}

async fn register_connector(h: &Harness, id: i64) -> Arc<WebhookConnector> {
    let record = webhook_record(id, &format!("/hook-{id}"), false);
    h.store
        .connectors
        .lock()
        .unwrap()
        .insert(record.id, record.clone());
    let bus = Arc::new(EventBus::default());
    let connector = Arc::new(
        WebhookConnector::from_record(
            &record,
            Arc::new(HmacSha256Verifier::new()),
            h.store.clone(),
            bus,
            h.queue.clone(),
        )
        .unwrap(),
    );
    connector.start().await.unwrap();
    h.registry.register(connector.clone());
    connector
}

#[tokio::test]
async fn due_connector_gets_a_high_priority_poll() {
    let h = harness(QueueConfig::default());
    let connector = register_connector(&h, 1).await;

    h.scheduler
        .schedule_connector(connector.id(), Duration::from_secs(60));
    h.scheduler.tick();

    assert_eq!(h.queue.stats().pending, 1);
    // next_run advanced past now before the enqueue.
    let next = h.scheduler.next_run(connector.id()).unwrap();
    assert!(next > Utc::now() + chrono::Duration::seconds(50));

    // Not due again on the next tick.
    h.scheduler.tick();
    assert_eq!(h.queue.stats().pending, 1);
}

#[tokio::test]
async fn disabled_connector_is_skipped() {
    let h = harness(QueueConfig::default());
    let connector = register_connector(&h, 1).await;
    h.scheduler
        .schedule_connector(connector.id(), Duration::from_secs(60));

    for _ in 0..5 {
        connector
            .set_status(ConnectorStatus::Error, Some("x".to_string()))
            .await
            .unwrap();
    }
    assert_eq!(connector.status(), ConnectorStatus::Disabled);

    h.scheduler.tick();
    assert_eq!(h.queue.stats().pending, 0, "quarantined connectors take no ticks");
}

#[tokio::test]
async fn paused_connector_is_skipped() {
    let h = harness(QueueConfig::default());
    let connector = register_connector(&h, 1).await;
    h.scheduler
        .schedule_connector(connector.id(), Duration::from_secs(60));
    connector.stop().await.unwrap();

    h.scheduler.tick();
    assert_eq!(h.queue.stats().pending, 0);
}

#[tokio::test]
async fn rate_limit_suppresses_until_deadline() {
    let h = harness(QueueConfig::default());
    let connector = register_connector(&h, 1).await;
    h.scheduler
        .schedule_connector(connector.id(), Duration::from_secs(60));

    connector
        .core()
        .suspend_until(Utc::now() + chrono::Duration::seconds(30));
    h.scheduler.tick();
    assert_eq!(h.queue.stats().pending, 0);

    // Past the deadline the entry is still due and polls.
    connector
        .core()
        .suspend_until(Utc::now() - chrono::Duration::seconds(1));
    h.scheduler.tick();
    assert_eq!(h.queue.stats().pending, 1);
}

#[tokio::test]
async fn run_connector_now_enqueues_critical() {
    let h = harness(QueueConfig::default());
    let connector = register_connector(&h, 1).await;

    let job_id = h.scheduler.run_connector_now(connector.id()).unwrap();
    let job = h.queue.job(job_id).unwrap();
    assert_eq!(job.priority, JobPriority::Critical);
    assert!(matches!(job.payload, JobPayload::RunConnector));
    assert_eq!(job.max_attempts, 5);
}

#[tokio::test]
async fn queue_full_backs_off_to_the_next_tick() {
    let h = harness(QueueConfig { max_queue_size: 1, ..QueueConfig::default() });
    let connector = register_connector(&h, 1).await;
    // Fill the queue.
    h.queue
        .enqueue(QueueJob::new(
            "other",
            JobPayload::RunConnector,
            "test",
            JobPriority::Low,
        ))
        .unwrap();

    h.scheduler
        .schedule_connector(connector.id(), Duration::from_secs(60));
    h.scheduler.tick();

    // Entry stays due so the next tick retries.
    let next = h.scheduler.next_run(connector.id()).unwrap();
    assert!(next <= Utc::now());
}

#[tokio::test]
async fn unschedule_removes_the_entry() {
    let h = harness(QueueConfig::default());
    let connector = register_connector(&h, 1).await;
    h.scheduler
        .schedule_connector(connector.id(), Duration::from_secs(60));
    h.scheduler.unschedule_connector(connector.id());

    h.scheduler.tick();
    assert_eq!(h.queue.stats().pending, 0);
    assert!(h.scheduler.next_run(connector.id()).is_none());
}

#[tokio::test]
async fn update_schedule_recomputes_next_run() {
    let h = harness(QueueConfig::default());
    let connector = register_connector(&h, 1).await;
    h.scheduler
        .schedule_connector(connector.id(), Duration::from_secs(60));

    h.scheduler
        .update_connector_schedule(connector.id(), Duration::from_secs(600));
    let next = h.scheduler.next_run(connector.id()).unwrap();
    assert!(next > Utc::now() + chrono::Duration::seconds(590));
}

#[tokio::test]
async fn tick_ignores_unknown_configuration() {
    // A schedule whose connector has disappeared from the registry.
    let h = harness(QueueConfig::default());
    h.scheduler.schedule_connector("ghost", Duration::from_secs(60));
    h.scheduler.tick();
    assert_eq!(h.queue.stats().pending, 0);
}

// Smoke check for the webhook JSON round-trip used in these harnesses.
#[tokio::test]
async fn webhook_records_parse() {
    let record = webhook_record(9, "/x", false);
    assert_eq!(record.configuration["path"], json!("/x"));
}
