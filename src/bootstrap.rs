//! Bootstrap: construct-once wiring of every runtime component.
//!
//! Loads connector rows from the Store, builds and registers their
//! adapters, starts the scheduler, queue workers, pipeline, monitor, and
//! the HTTP surface, and tears everything down in a fixed order on
//! shutdown: scheduler ticks stop first, the queue drains, adapters stop,
//! observer sinks close.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::connectors::{
    AgentConnector, ApiConnector, Connector, SyslogConnector, WebhookConnector,
};
use crate::connectors::api::HttpSourceClient;
use crate::domain::models::config::Config;
use crate::domain::models::{ConnectorConfig, ConnectorPatch, ConnectorRecord, ConnectorType,
    JobPayload, QueueJob};
use crate::domain::ports::{ConnectorFilter, HmacSha256Verifier, Store};
use crate::infrastructure::database::{DatabaseConnection, SqliteStore};
use crate::infrastructure::http::{self, HttpState};
use crate::services::event_bus::{EventBus, EventBusConfig};
use crate::services::job_queue::{JobHandler, JobQueue};
use crate::services::monitor::RealtimeMonitor;
use crate::services::pipeline::EventPipeline;
use crate::services::registry::ConnectorRegistry;
use crate::services::scheduler::PollScheduler;

/// Routes dequeued jobs: polls go to the registry, events to the pipeline.
pub struct JobDispatcher {
    registry: Arc<ConnectorRegistry>,
    pipeline: Arc<EventPipeline>,
    store: Arc<dyn Store>,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        pipeline: Arc<EventPipeline>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self { registry, pipeline, store }
    }
}

#[async_trait]
impl JobHandler for JobDispatcher {
    async fn handle(&self, job: &QueueJob) -> Result<()> {
        match &job.payload {
            JobPayload::RunConnector => {
                let connector = self
                    .registry
                    .get(&job.connector_id)
                    .ok_or_else(|| anyhow!("connector {} is not registered", job.connector_id))?;
                connector
                    .run_once()
                    .await
                    .map_err(|err| anyhow!("run_once failed: {err}"))
            }
            JobPayload::ProcessEvent { event } => {
                self.pipeline
                    .process(event)
                    .await
                    .map_err(|err| anyhow!("pipeline failed: {err}"))?;
                // Success: push the connector's counters to the Store.
                if let Some(connector) = self.registry.get(&job.connector_id) {
                    let patch = ConnectorPatch {
                        metrics: Some(connector.metrics()),
                        ..ConnectorPatch::default()
                    };
                    if let Err(err) = self
                        .store
                        .update_connector(connector.core().record_id, patch)
                        .await
                    {
                        warn!(connector_id = %job.connector_id, error = %err,
                            "failed to persist connector metrics");
                    }
                }
                Ok(())
            }
        }
    }
}

/// The fully wired runtime.
pub struct Runtime {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ConnectorRegistry>,
    pub queue: Arc<JobQueue>,
    pub pipeline: Arc<EventPipeline>,
    pub scheduler: Arc<PollScheduler>,
    pub monitor: Arc<RealtimeMonitor>,
    agents: Arc<Vec<Arc<AgentConnector>>>,
    webhooks: Arc<HashMap<String, Arc<WebhookConnector>>>,
    handles: Vec<JoinHandle<()>>,
    http_shutdown: Option<watch::Sender<bool>>,
}

impl Runtime {
    /// Connect to the Store (bounded retry), load connector rows, build and
    /// register adapters, and start every loop.
    ///
    /// Fails — and the process exits non-zero — on an unreachable Store or
    /// a duplicate bind on a syslog port.
    pub async fn init(config: Config) -> Result<Self> {
        let database_url = format!("sqlite:{}", config.database.path);
        if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let max_connections = config.database.max_connections;
        let db = backoff::future::retry(
            backoff::ExponentialBackoff {
                max_elapsed_time: Some(Duration::from_secs(30)),
                ..backoff::ExponentialBackoff::default()
            },
            || async {
                DatabaseConnection::with_max_connections(&database_url, max_connections)
                    .await
                    .map_err(backoff::Error::transient)
            },
        )
        .await
        .map_err(|err| anyhow!("store unreachable: {err}"))?;
        db.migrate().await.context("store migration failed")?;

        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db.pool().clone()));
        Self::init_with_store(config, store).await
    }

    /// Wire the runtime over an already-connected Store.
    pub async fn init_with_store(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        let queue = Arc::new(JobQueue::new(config.queue.clone()));
        let registry = Arc::new(ConnectorRegistry::new(bus.clone()));
        let pipeline = Arc::new(EventPipeline::with_null_enrichments(
            store.clone(),
            bus.clone(),
        ));
        let scheduler = Arc::new(PollScheduler::new(
            registry.clone(),
            queue.clone(),
            config.scheduler.clone(),
        ));
        let monitor = Arc::new(RealtimeMonitor::new(
            registry.clone(),
            bus.clone(),
            config.monitor.clone(),
        ));

        let mut runtime = Self {
            config,
            store,
            bus,
            registry,
            queue,
            pipeline,
            scheduler,
            monitor,
            agents: Arc::new(Vec::new()),
            webhooks: Arc::new(HashMap::new()),
            handles: Vec::new(),
            http_shutdown: None,
        };
        runtime.load_connectors().await?;
        runtime.start_loops();
        Ok(runtime)
    }

    async fn load_connectors(&mut self) -> Result<()> {
        let records = self
            .store
            .list_connectors(ConnectorFilter { is_active: Some(true), ..ConnectorFilter::default() })
            .await
            .context("failed to list connectors")?;
        info!(count = records.len(), "loading connectors from store");

        let mut agents = Vec::new();
        let mut webhooks = HashMap::new();

        for record in records {
            match self.build_connector(&record, &mut agents, &mut webhooks) {
                Ok(connector) => {
                    self.registry.register(connector.clone());
                    if record.connector_type.is_pull() {
                        let interval = ConnectorConfig::from_record(&record)
                            .ok()
                            .and_then(|c| c.poll_interval())
                            .unwrap_or(Duration::from_secs(
                                crate::domain::models::DEFAULT_POLL_INTERVAL_SECS,
                            ));
                        self.scheduler.schedule_connector(&record.runtime_id(), interval);
                    }

                    if let Err(err) = connector.start().await {
                        if record.connector_type == ConnectorType::Syslog {
                            // Duplicate binds on syslog ports are unrecoverable.
                            return Err(anyhow!(
                                "syslog connector {} failed to start: {err}",
                                record.id
                            ));
                        }
                        warn!(connector_id = record.id, error = %err, "connector failed to start");
                    }
                }
                Err(err) => {
                    error!(connector_id = record.id, error = %err, "invalid connector configuration");
                }
            }
        }

        self.agents = Arc::new(agents);
        self.webhooks = Arc::new(webhooks);
        Ok(())
    }

    fn build_connector(
        &self,
        record: &ConnectorRecord,
        agents: &mut Vec<Arc<AgentConnector>>,
        webhooks: &mut HashMap<String, Arc<WebhookConnector>>,
    ) -> Result<Arc<dyn Connector>> {
        let store = self.store.clone();
        let bus = self.bus.clone();
        let jobs = self.queue.clone();

        let connector: Arc<dyn Connector> = match record.connector_type {
            ConnectorType::Api => {
                let config = ConnectorConfig::from_record(record)?;
                let ConnectorConfig::Api(api) = &config else {
                    return Err(anyhow!("connector type/configuration mismatch"));
                };
                let client = Arc::new(HttpSourceClient::new(api)?);
                Arc::new(ApiConnector::from_record(record, client, store, bus, jobs)?)
            }
            ConnectorType::Syslog => {
                Arc::new(SyslogConnector::from_record(record, store, bus, jobs)?)
            }
            ConnectorType::Agent => {
                let connector = Arc::new(AgentConnector::from_record(
                    record,
                    self.config.auth.agent_token_secret.clone(),
                    self.config.auth.token_ttl_days,
                    store,
                    bus,
                    jobs,
                )?);
                agents.push(connector.clone());
                connector
            }
            ConnectorType::Webhook => {
                let connector = Arc::new(WebhookConnector::from_record(
                    record,
                    Arc::new(HmacSha256Verifier::new()),
                    store,
                    bus,
                    jobs,
                )?);
                webhooks.insert(connector.path(), connector.clone());
                connector
            }
        };
        Ok(connector)
    }

    fn start_loops(&mut self) {
        let dispatcher = Arc::new(JobDispatcher::new(
            self.registry.clone(),
            self.pipeline.clone(),
            self.store.clone(),
        ));
        self.handles.extend(self.queue.start(dispatcher));
        self.handles.push(self.scheduler.start());
        self.handles.extend(self.monitor.start());

        let (tx, mut rx) = watch::channel(false);
        let state = HttpState {
            agents: self.agents.clone(),
            webhooks: self.webhooks.clone(),
            monitor: self.monitor.clone(),
            token_secret: Arc::new(self.config.auth.agent_token_secret.clone()),
        };
        let http_config = self.config.http.clone();
        self.handles.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(err) = http::serve_with_shutdown(&http_config, state, shutdown).await {
                error!(error = %err, "http surface failed");
            }
        }));
        self.http_shutdown = Some(tx);
    }

    /// HTTP state for out-of-process serving (used by tests).
    pub fn http_state(&self) -> HttpState {
        HttpState {
            agents: self.agents.clone(),
            webhooks: self.webhooks.clone(),
            monitor: self.monitor.clone(),
            token_secret: Arc::new(self.config.auth.agent_token_secret.clone()),
        }
    }

    /// Graceful shutdown: stop scheduler ticks, stop enqueuing and drain
    /// the workers, stop adapters, close observer sinks.
    pub async fn shutdown(mut self) {
        info!("shutting down");
        self.scheduler.stop();

        let drain = Duration::from_secs(self.config.queue.job_timeout_secs);
        self.queue.shutdown(drain).await;

        for connector in self.registry.all() {
            if let Err(err) = connector.stop().await {
                warn!(connector_id = %connector.id(), error = %err, "connector stop failed");
            }
        }

        self.monitor.stop();
        if let Some(tx) = self.http_shutdown.take() {
            let _ = tx.send(true);
        }
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("shutdown complete");
    }
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let runtime = Runtime::init(config).await?;
    info!(connectors = runtime.registry.len(), "sentinel started");

    wait_for_signal().await;
    runtime.shutdown().await;
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            () = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
