//! # Middleware Pipeline
//!
//! Cross-cutting behavior placed between event delivery and an application
//! handler. A [`MiddlewareChain`] is an ordered list of [`Middleware`] units;
//! unit 0 wraps unit 1, which wraps unit 2, and so on down to the handler.
//!
//! ## Execution
//!
//! Each unit receives the event and a [`Next`] continuation. `Next` is an
//! index into the shared pipeline, so running a chain allocates no closures.
//! A unit may:
//!
//! - forward (`next.run(event)`), possibly with a replacement event
//! - suppress delivery by returning [`Outcome::Dropped`]
//! - defer delivery by keeping `next` and returning [`Outcome::Queued`]
//! - retry by running a clone of `next` again
//!
//! Order matters: a rate limiter placed before metrics keeps dropped events
//! out of the counts; placed after, they are counted.
//!
//! ```rust,ignore
//! let chain = MiddlewareChain::new()
//!     .with(LoggingMiddleware::new())
//!     .with(RateLimitMiddleware::new(RateLimitConfig::per_source(10, Duration::from_secs(1))))
//!     .with(RetryMiddleware::new(RetryConfig::default()));
//!
//! bus.subscribe("game.*", chain.into_callback(handler)).await?;
//! ```

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use bus_telemetry::{metric_inc, MIDDLEWARE_DROPS};

use crate::callback::{EventCallback, SharedCallback};
use crate::error::HandlerError;
use crate::event::Event;

pub mod filter;
pub mod logging;
pub mod metrics;
pub mod priority;
pub mod rate_limit;
pub mod retry;

pub use filter::{FilterMiddleware, TransformMiddleware};
pub use logging::LoggingMiddleware;
pub use metrics::{MetricsMiddleware, MetricsSnapshot, MAX_LATENCY_SAMPLES};
pub use priority::{PriorityQueueConfig, PriorityQueueMiddleware};
pub use rate_limit::{RateLimitConfig, RateLimitMiddleware};
pub use retry::{RetryConfig, RetryMiddleware};

/// Why a unit stopped an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    RateLimited,
    Filtered,
    QueueFull,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Filtered => "filtered",
            Self::QueueFull => "queue_full",
        }
    }

    /// Count the drop in the shared Prometheus registry.
    pub(crate) fn record(self) {
        metric_inc!(MIDDLEWARE_DROPS, &[self.as_str()]);
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an event that entered a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The final handler ran and succeeded.
    Delivered,
    /// A unit deferred delivery; the handler runs later.
    Queued,
    /// A unit suppressed the event.
    Dropped(DropReason),
}

impl Outcome {
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }

    pub fn is_dropped(self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

/// One composable unit of the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Short label for diagnostics.
    fn name(&self) -> &'static str;

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError>;
}

struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: SharedCallback,
}

/// Continuation invoking the rest of the chain.
///
/// Cloning is cheap; a clone runs the same remaining units again.
#[derive(Clone)]
pub struct Next {
    pipeline: Arc<Pipeline>,
    index: usize,
}

impl Next {
    fn start(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline, index: 0 }
    }

    /// Run the remaining units and then the handler.
    pub async fn run(self, event: Event) -> Result<Outcome, HandlerError> {
        match self.pipeline.middlewares.get(self.index) {
            Some(middleware) => {
                let middleware = Arc::clone(middleware);
                let next = Self {
                    pipeline: Arc::clone(&self.pipeline),
                    index: self.index + 1,
                };
                middleware.process(event, next).await
            }
            None => {
                self.pipeline.handler.handle(event).await?;
                Ok(Outcome::Delivered)
            }
        }
    }

    /// Number of units still ahead of the handler.
    pub fn remaining(&self) -> usize {
        self.pipeline.middlewares.len().saturating_sub(self.index)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Flags and configs for [`MiddlewareChain::standard`].
#[derive(Debug, Clone)]
pub struct StandardChainConfig {
    pub logging: bool,
    pub metrics: bool,
    pub rate_limit: Option<RateLimitConfig>,
    pub retry: Option<RetryConfig>,
}

impl Default for StandardChainConfig {
    fn default() -> Self {
        Self {
            logging: true,
            metrics: true,
            rate_limit: None,
            retry: None,
        }
    }
}

/// Ordered list of middleware units.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// logging → metrics → rate limit → retry, each present if enabled.
    #[must_use]
    pub fn standard(config: &StandardChainConfig) -> Self {
        let mut chain = Self::new();
        if config.logging {
            chain = chain.with(LoggingMiddleware::new());
        }
        if config.metrics {
            chain = chain.with(MetricsMiddleware::new());
        }
        if let Some(rate_limit) = &config.rate_limit {
            chain = chain.with(RateLimitMiddleware::new(rate_limit.clone()));
        }
        if let Some(retry) = &config.retry {
            chain = chain.with(RetryMiddleware::new(retry.clone()));
        }
        chain
    }

    /// Append a unit (builder style).
    #[must_use]
    pub fn with(self, middleware: impl Middleware + 'static) -> Self {
        self.with_shared(Arc::new(middleware))
    }

    /// Append a unit the caller keeps a handle to, e.g. to read metrics.
    #[must_use]
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.add(middleware);
        self
    }

    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Remove a previously added unit by identity. Returns whether it was present.
    pub fn remove(&mut self, middleware: &Arc<dyn Middleware>) -> bool {
        let target = Arc::as_ptr(middleware).cast::<()>();
        let before = self.middlewares.len();
        self.middlewares
            .retain(|m| Arc::as_ptr(m).cast::<()>() != target);
        self.middlewares.len() != before
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Unit names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run one event through the chain into `handler`.
    pub async fn execute(
        &self,
        event: Event,
        handler: SharedCallback,
    ) -> Result<Outcome, HandlerError> {
        let pipeline = Arc::new(Pipeline {
            middlewares: self.middlewares.clone(),
            handler,
        });
        Next::start(pipeline).run(event).await
    }

    /// Freeze the chain around `handler` as a bus callback.
    pub fn into_callback(self, handler: SharedCallback) -> SharedCallback {
        Arc::new(ChainedCallback {
            pipeline: Arc::new(Pipeline {
                middlewares: self.middlewares,
                handler,
            }),
        })
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &self.names())
            .finish()
    }
}

/// A chain bound to its handler, usable as a subscription callback.
///
/// Drops and deferrals are successful deliveries from the bus's point of
/// view; handler errors surface as callback errors.
pub struct ChainedCallback {
    pipeline: Arc<Pipeline>,
}

#[async_trait]
impl EventCallback for ChainedCallback {
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let event_type = event.event_type().to_string();
        let outcome = Next::start(Arc::clone(&self.pipeline)).run(event).await?;
        if outcome != Outcome::Delivered {
            debug!(event_type = %event_type, ?outcome, "Event not delivered to handler");
        }
        Ok(())
    }
}
