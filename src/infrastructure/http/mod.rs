//! HTTP surface: agent API, webhook intake, realtime channel.
//!
//! The adapters never reach for a process-global router; the bootstrap
//! hands each of them to this module, which builds one axum `Router`.

pub mod agent_api;
pub mod realtime;
pub mod webhook_api;

use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::connectors::{AgentConnector, WebhookConnector};
use crate::domain::models::config::HttpConfig;
use crate::services::monitor::RealtimeMonitor;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub agents: Arc<Vec<Arc<AgentConnector>>>,
    pub webhooks: Arc<HashMap<String, Arc<WebhookConnector>>>,
    pub monitor: Arc<RealtimeMonitor>,
    pub token_secret: Arc<String>,
}

/// Uniform error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Build the router over the shared state.
pub fn build_router(state: HttpState, enable_cors: bool) -> Router {
    let app = Router::new()
        .route("/api/agents/register", post(agent_api::register))
        .route("/api/agents/heartbeat", post(agent_api::heartbeat))
        .route("/api/agents/data", post(agent_api::data))
        .route("/api/agents/config", get(agent_api::config))
        .route("/hooks/{*path}", post(webhook_api::deliver))
        .route("/api/realtime", get(realtime::stream))
        .route("/health", get(health_check))
        .with_state(state);

    if enable_cors {
        app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .layer(TraceLayer::new_for_http())
    } else {
        app.layer(TraceLayer::new_for_http())
    }
}

async fn health_check() -> &'static str {
    "OK"
}

/// Serve until the shutdown future resolves.
pub async fn serve_with_shutdown<F>(
    config: &HttpConfig,
    state: HttpState,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let router = build_router(state, config.enable_cors);

    info!("http surface listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
