// =============================================================================
// WebSocket Handler — Push-based dashboard updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate full DashboardSnapshot on connect.
//   2. A fresh snapshot every 500 ms whenever the state_version has changed
//      since the last push.
//   3. A snapshot straight away when a series event arrives for the key the
//      client is looking at, without waiting for the poll.
//
// Inbound text frames of the form {"type": "select", "symbol"?, "timeframe"}
// switch the active view. Any other text is treated as a heartbeat.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::api::rest::ensure_loaded;
use crate::app_state::AppState;
use crate::market_data::SeriesEvent;
use crate::types::Timeframe;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Select {
        #[serde(default)]
        symbol: Option<String>,
        timeframe: Timeframe,
    },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Manages a single WebSocket connection lifecycle.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut candle_events = state.candle_buffer.subscribe();
    let mut score_events = state.score_buffer.subscribe();

    let mut last_sent_version = match send_snapshot(&mut sender, &state).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Failed to send initial WebSocket snapshot");
            return;
        }
    };

    let mut push_interval = interval(PUSH_INTERVAL);

    loop {
        let pushed = tokio::select! {
            // ── Poll: version changed since the last push ───────────────
            _ = push_interval.tick() => {
                if state.current_state_version() == last_sent_version {
                    continue;
                }
                send_snapshot(&mut sender, &state).await
            }

            // ── Series events for the active key ────────────────────────
            event = candle_events.recv() => match on_event(&state, event) {
                EventAction::Push => send_snapshot(&mut sender, &state).await,
                EventAction::Skip => continue,
                EventAction::Stop => break,
            },
            event = score_events.recv() => match on_event(&state, event) {
                EventAction::Push => send_snapshot(&mut sender, &state).await,
                EventAction::Skip => continue,
                EventAction::Stop => break,
            },

            // ── Inbound frames ──────────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_text(&state, &text) {
                            continue;
                        }
                        send_snapshot(&mut sender, &state).await
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        };

        match pushed {
            Ok(version) => last_sent_version = version,
            Err(e) => {
                debug!(error = %e, "WebSocket send failed — disconnecting");
                break;
            }
        }
    }

    info!("WebSocket connection closed");
}

enum EventAction {
    Push,
    Skip,
    Stop,
}

fn on_event(state: &AppState, event: Result<SeriesEvent, RecvError>) -> EventAction {
    match event {
        Ok(ev) if ev.key == state.active_view().key() => EventAction::Push,
        Ok(_) => EventAction::Skip,
        Err(RecvError::Lagged(skipped)) => {
            debug!(skipped, "WebSocket event receiver lagged");
            EventAction::Skip
        }
        Err(RecvError::Closed) => EventAction::Stop,
    }
}

/// Returns `true` when the frame changed the active view.
fn handle_client_text(state: &Arc<AppState>, text: &str) -> bool {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::Select { symbol, timeframe }) => {
            let changed = state.set_active_view(symbol.as_deref(), timeframe);
            ensure_loaded(state, state.active_view().key());
            changed
        }
        Err(_) => {
            debug!(msg = %text, "WebSocket text message received (heartbeat)");
            false
        }
    }
}

/// Serialize and send the current snapshot; returns the version it carried.
async fn send_snapshot<S>(sender: &mut S, state: &Arc<AppState>) -> Result<u64, axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = state.build_snapshot();
    let version = snapshot.state_version;

    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(version, candles = snapshot.candles.len(), "WebSocket snapshot sent");
        }
        // Serialisation errors are not network errors; keep the socket.
        Err(e) => warn!(error = %e, "Failed to serialize snapshot"),
    }
    Ok(version)
}
