//! `/ws`: live pipeline events for dashboards.
//!
//! A client gets one `Status` event on connect, then every event the
//! pipeline broadcasts. Per-tick events are thinned to 10 per second.

use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use super::shared::SharedStateHandle;
use crate::pipeline::{PipelineEvent, StatusSummary};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedStateHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

/// Drops tick events that arrive sooner than `interval` after the last one
/// let through. Other events always pass.
#[derive(Debug)]
struct TickThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl TickThrottle {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn admit(&mut self, event: &PipelineEvent, now: Instant) -> bool {
        if !matches!(event, PipelineEvent::Tick { .. }) {
            return true;
        }
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

type EventSink = SplitSink<WebSocket, Message>;

/// Serialize and send one event. `false` once the client is gone.
async fn push(sink: &mut EventSink, event: &PipelineEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unserializable event");
            true
        }
    }
}

async fn stream_events(socket: WebSocket, state: SharedStateHandle) {
    let (mut sink, mut incoming) = socket.split();
    let mut events = state.subscribe();

    let status = PipelineEvent::Status(StatusSummary::from(state.get_snapshot().as_ref()));
    if !push(&mut sink, &status).await {
        return;
    }
    tracing::debug!("Event stream opened");

    // The socket is read only to notice the client leaving
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = incoming.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Event stream read failed");
                    break;
                }
            }
        }
    });

    let mut writer = tokio::spawn(async move {
        let mut throttle = TickThrottle::new(TICK_INTERVAL);
        loop {
            match events.recv().await {
                Ok(event) => {
                    if throttle.admit(&event, Instant::now()) && !push(&mut sink, &event).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event stream fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut reader => writer.abort(),
        _ = &mut writer => reader.abort(),
    }

    tracing::debug!("Event stream closed");
}
