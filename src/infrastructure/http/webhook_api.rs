//! Webhook intake handler.
//!
//! Connectors register under `/hooks/<path>`; the handler dispatches on the
//! configured path and hands the raw body to the connector, which owns
//! signature verification.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;

use crate::connectors::webhook::DeliveryError;

use super::{ErrorResponse, HttpState};

#[derive(Debug, serde::Serialize)]
pub struct DeliverResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /hooks/{*path}`
pub async fn deliver(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeliverResponse>, (StatusCode, Json<ErrorResponse>)> {
    let path = format!("/{path}");
    let connector = state.webhooks.get(&path).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(format!("no webhook registered at {path}"))),
        )
    })?;

    let signature = connector.signature_header().and_then(|header| {
        headers
            .get(header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    });

    match connector.handle_delivery(&body, signature.as_deref()) {
        Ok(()) => Ok(Json(DeliverResponse {
            success: true,
            message: "accepted".to_string(),
        })),
        Err(err) => {
            let status = match err {
                DeliveryError::InvalidSignature => StatusCode::UNAUTHORIZED,
                DeliveryError::InvalidPayload => StatusCode::BAD_REQUEST,
                DeliveryError::QueueFull | DeliveryError::NotAccepting => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            Err((status, Json(ErrorResponse::new(err.to_string()))))
        }
    }
}
