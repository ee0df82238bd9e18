//! Realtime channel: Server-Sent Events bridge over the monitor.
//!
//! Each connected client becomes an observer sink; the monitor removes
//! sinks whose receivers fall behind or disconnect.

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;

use super::HttpState;

/// `GET /api/realtime`
pub async fn stream(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.monitor.subscribe();

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        let event = Event::default()
            .json_data(&message)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Some((Ok(event), rx))
    });

    Sse::new(stream)
}
