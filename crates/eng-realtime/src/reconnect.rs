//! Bounded reconnection with exponential backoff.
//!
//! Session connections that drop are retried automatically. After the last
//! attempt the failure is surfaced as [`RealtimeError::ReconnectExhausted`]
//! and the caller must ask the user to reconnect by hand.

use crate::error::RealtimeError;
use std::future::Future;
use std::time::Duration;

/// Reconnect backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of connection attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Policy with the default backoff and the given attempt bound.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_delay_ms * self.multiplier.powi(attempt as i32 - 1);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        if self.jitter {
            // Up to 25% extra, never past the cap.
            let jitter_factor = 1.0 + (rand::random::<f64>() * 0.25);
            let max_ms = self.max_delay.as_millis() as f64;
            Duration::from_millis((capped_ms * jitter_factor).min(max_ms) as u64)
        } else {
            Duration::from_millis(capped_ms as u64)
        }
    }

    /// Runs `connect` until it succeeds or the attempts run out.
    pub async fn connect_with_retry<F, Fut, T, E>(&self, mut connect: F) -> Result<T, RealtimeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match connect(attempt).await {
                Ok(connection) => {
                    if attempt > 1 {
                        tracing::info!(attempt = attempt, "Reconnected");
                    }
                    return Ok(connection);
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        tracing::warn!(
                            attempt = attempt,
                            max_attempts = max_attempts,
                            error = %e,
                            "Reconnect attempts exhausted"
                        );
                        return Err(RealtimeError::ReconnectExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::debug!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reconnecting after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Runs `connect` under `policy`.
pub async fn connect_with_retry<F, Fut, T, E>(
    policy: &ReconnectPolicy,
    connect: F,
) -> Result<T, RealtimeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    policy.connect_with_retry(connect).await
}
