//! Exponential-backoff reconnection for the agent WebSocket.
//!
//! Attempts are unbounded; only the delay between them is capped. Callers
//! above the registry must therefore tolerate an arbitrarily long gap
//! between a disconnect and the next ready notification.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::transport::{WsConnection, WsConnector};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Backoff state carried across the lifetime of one registry.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            delay,
            attempt: 0,
        }
    }

    /// Number of failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt and return how long to wait before the next.
    pub fn fail(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let wait = self.delay;
        self.delay = next_delay(self.delay, &self.config);
        wait
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.config.initial_delay.min(self.config.max_delay);
    }
}

/// Connect, retrying with backoff until a connection succeeds.
///
/// The first attempt is made immediately. Returns `None` only when
/// `cancel` is triggered.
pub async fn reconnect_loop(
    connector: &WsConnector,
    backoff: &mut Backoff,
    cancel: &CancellationToken,
) -> Option<WsConnection> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return None;
            }
            result = connector.connect() => {
                match result {
                    Ok(conn) => {
                        if backoff.attempt() > 0 {
                            tracing::info!(
                                connection_id = %conn.connection_id,
                                attempts = backoff.attempt(),
                                "Reconnected to agent",
                            );
                        }
                        backoff.reset();
                        return Some(conn);
                    }
                    Err(e) => {
                        let delay = backoff.fail();
                        tracing::warn!(
                            error = %e,
                            attempt = backoff.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            "Agent connection attempt failed",
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return None,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
}
