//! Agent API handlers.
//!
//! Registration resolves the matching agent connector via the presented
//! organization key; every other endpoint is bearer-authenticated with the
//! token issued at registration.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::connectors::agent::{verify_agent_token, AgentRegistration, AgentTokenClaims};
use crate::connectors::{AgentConnector, Connector};
use crate::domain::models::AgentMetrics;

use super::{ErrorResponse, HttpState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub agent_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub success: bool,
    pub message: String,
    pub accepted: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub success: bool,
    pub heartbeat_interval: u64,
    pub batch_size: usize,
    pub batch_time_limit: u64,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_config: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub cpu: f64,
    pub memory: f64,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub disk_space: Option<f64>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataRequest {
    pub events: Vec<Value>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn unauthorized(message: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(message)))
}

/// Extract and validate the bearer token.
fn bearer_claims(headers: &HeaderMap, secret: &str) -> Result<AgentTokenClaims, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| unauthorized("missing bearer token"))?;
    verify_agent_token(secret, token).ok_or_else(|| unauthorized("invalid bearer token"))
}

/// Agent connector the authenticated token belongs to.
fn connector_for_claims(
    state: &HttpState,
    claims: &AgentTokenClaims,
) -> Result<Arc<AgentConnector>, ApiError> {
    state
        .agents
        .iter()
        .find(|connector| connector.id() == claims.connector)
        .cloned()
        .ok_or_else(|| unauthorized("token references an unknown connector"))
}

/// `POST /api/agents/register`
pub async fn register(
    State(state): State<HttpState>,
    Json(request): Json<AgentRegistration>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let connector = state
        .agents
        .iter()
        .find(|connector| connector.matches_organization_key(&request.organization_key))
        .cloned()
        .ok_or_else(|| unauthorized("invalid organization key"))?;

    match connector.register_agent(request).await {
        Ok(registered) => Ok(Json(RegisterResponse {
            success: true,
            message: "agent registered".to_string(),
            agent_id: registered.agent_id,
            token: registered.token,
        })),
        Err(err) => Err((StatusCode::FORBIDDEN, Json(ErrorResponse::new(err.to_string())))),
    }
}

/// `POST /api/agents/heartbeat`
pub async fn heartbeat(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let claims = bearer_claims(&headers, &state.token_secret)?;
    let connector = connector_for_claims(&state, &claims)?;
    let agent_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| unauthorized("invalid agent id in token"))?;

    let metrics = AgentMetrics {
        cpu: request.cpu,
        memory: request.memory,
        disk_space: request.disk_space,
    };
    connector
        .process_heartbeat(agent_id, metrics)
        .await
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(err.to_string())),
            )
        })?;
    Ok(Json(AckResponse { success: true, message: "heartbeat recorded".to_string() }))
}

/// `POST /api/agents/data`
pub async fn data(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(request): Json<DataRequest>,
) -> Result<Json<DataResponse>, ApiError> {
    let claims = bearer_claims(&headers, &state.token_secret)?;
    let connector = connector_for_claims(&state, &claims)?;
    let agent_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| unauthorized("invalid agent id in token"))?;

    let accepted = connector
        .process_events(agent_id, request.events)
        .await
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(err.to_string())),
            )
        })?;
    Ok(Json(DataResponse {
        success: true,
        message: format!("{accepted} events accepted"),
        accepted,
    }))
}

/// `GET /api/agents/config`
pub async fn config(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<Json<ConfigResponse>, ApiError> {
    let claims = bearer_claims(&headers, &state.token_secret)?;
    let connector = connector_for_claims(&state, &claims)?;
    let agent_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| unauthorized("invalid agent id in token"))?;

    let effective = connector
        .agent_effective_config(agent_id)
        .await
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(err.to_string())),
            )
        })?;
    Ok(Json(ConfigResponse {
        success: true,
        heartbeat_interval: effective.heartbeat_interval,
        batch_size: effective.batch_size,
        batch_time_limit: effective.batch_time_limit,
        capabilities: effective.capabilities,
        custom_config: effective.custom_config,
    }))
}
