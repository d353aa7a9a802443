//! Retry with exponential back-off.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, warn};

use super::{Middleware, Next, Outcome};
use crate::error::HandlerError;
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * 2^n`.
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Back-off before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Re-runs the rest of the chain when it fails.
///
/// After `max_retries + 1` failed attempts the last error is returned as is,
/// so callers can still downcast it.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError> {
        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            let err = match next.clone().run(event.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            if attempt >= self.config.max_retries {
                error!(
                    event_type = event.event_type(),
                    attempts,
                    error = %err,
                    "Event processing failed after all attempts"
                );
                return Err(err);
            }

            let delay = self.config.delay_for(attempt);
            warn!(
                event_type = event.event_type(),
                attempt = attempt + 1,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Event processing failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
