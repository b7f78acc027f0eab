// =============================================================================
// Push-channel connection — bounded reconnect loop
// =============================================================================
//
// One session = connect, read frames until the stream closes or errors.
// Between sessions the policy hands out up to `max_attempts` retries with a
// fixed delay; a session that connects resets the count. When the budget runs
// out the state goes to `Exhausted` and `run_gateway` returns an error.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::types::ConnectionState;

use super::router::MessageRouter;

/// Fixed-delay retry budget for the push channel.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempts: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// A session connected; the budget starts over.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// Claim the next retry. `None` once the budget is spent.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.delay))
    }
}

/// Drive the push channel until the reconnect budget is exhausted.
pub async fn run_gateway(state: Arc<AppState>, router: Arc<MessageRouter>) -> Result<()> {
    let (url, mut policy) = {
        let config = state.runtime_config.read();
        (
            config.backend_ws_url.clone(),
            ReconnectPolicy::new(config.reconnect_max_attempts, config.reconnect_delay()),
        )
    };

    state.set_connection_state(ConnectionState::Connecting);

    loop {
        match run_session(&url, &state, &router, &mut policy).await {
            Ok(()) => warn!(url = %url, "push channel closed"),
            Err(e) => warn!(url = %url, error = %e, "push channel error"),
        }
        state.set_connection_state(ConnectionState::Disconnected);

        match policy.next_attempt() {
            Some((attempt, delay)) => {
                state.set_connection_state(ConnectionState::Reconnecting {
                    attempt,
                    max_attempts: policy.max_attempts(),
                });
                info!(attempt, max = policy.max_attempts(), delay_ms = delay.as_millis() as u64, "reconnecting");
                tokio::time::sleep(delay).await;
            }
            None => {
                let attempts = policy.max_attempts();
                state.set_connection_state(ConnectionState::Exhausted { attempts });
                error!(url = %url, attempts, "push channel reconnect budget exhausted");
                anyhow::bail!("push channel gave up after {attempts} reconnect attempts");
            }
        }
    }
}

/// One connected session. Returns `Ok` on a clean close.
async fn run_session(
    url: &str,
    state: &Arc<AppState>,
    router: &MessageRouter,
    policy: &mut ReconnectPolicy,
) -> Result<()> {
    info!(url = %url, "connecting to push channel");
    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to push channel")?;

    policy.on_connected();
    state.set_connection_state(ConnectionState::Connected);
    info!(url = %url, "push channel connected");

    let (mut write, mut read) = ws_stream.split();

    while let Some(frame) = read.next().await {
        match frame.context("push channel read error")? {
            Message::Text(text) => {
                router.route_text(&text);
            }
            Message::Ping(payload) => {
                write.send(Message::Pong(payload)).await.ok();
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
