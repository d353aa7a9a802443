//! Logs every event passing through, at a level chosen by its catalog priority.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{Middleware, Next, Outcome};
use crate::catalog::EventPriority;
use crate::error::HandlerError;
use crate::event::Event;

/// Critical events log at `error` tagged `priority = "critical"`, high at
/// `warn`, everything else at `info`. Always forwards.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    include_payload: bool,
}

impl LoggingMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log the payload as JSON.
    #[must_use]
    pub fn with_payload(mut self) -> Self {
        self.include_payload = true;
        self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError> {
        let payload = self
            .include_payload
            .then(|| Value::Object(event.payload().clone()).to_string());
        let event_type = event.event_type();
        let source = event.source();

        match event.priority() {
            EventPriority::Critical => error!(
                priority = "critical",
                event_type,
                source,
                payload = payload.as_deref(),
                "Event received"
            ),
            EventPriority::High => warn!(
                priority = "high",
                event_type,
                source,
                payload = payload.as_deref(),
                "Event received"
            ),
            EventPriority::Normal | EventPriority::Low => info!(
                event_type,
                source,
                payload = payload.as_deref(),
                "Event received"
            ),
        }

        next.run(event).await
    }
}
