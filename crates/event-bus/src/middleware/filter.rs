//! Predicate filtering and event rewriting.

use async_trait::async_trait;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, error};

use super::{DropReason, Middleware, Next, Outcome};
use crate::catalog::{EventPriority, EventType};
use crate::error::HandlerError;
use crate::event::Event;

type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;
type Mapping = Box<dyn Fn(&Event) -> Result<Event, HandlerError> + Send + Sync>;

/// Forwards events the predicate accepts; silently drops the rest.
pub struct FilterMiddleware {
    predicate: Predicate,
}

impl FilterMiddleware {
    pub fn new(predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
        }
    }

    /// Accept only the listed event types.
    pub fn by_types<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: HashSet<String> = allowed.into_iter().map(Into::into).collect();
        Self::new(move |event| allowed.contains(event.event_type()))
    }

    /// Accept only events from the listed sources.
    pub fn by_sources<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: HashSet<String> = allowed.into_iter().map(Into::into).collect();
        Self::new(move |event| allowed.contains(event.source()))
    }

    /// Accept catalog types at or above `min`. Types outside the catalog pass.
    pub fn by_min_priority(min: EventPriority) -> Self {
        Self::new(move |event| {
            EventType::from_str(event.event_type()).map_or(true, |known| known.priority() >= min)
        })
    }
}

#[async_trait]
impl Middleware for FilterMiddleware {
    fn name(&self) -> &'static str {
        "filter"
    }

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError> {
        if !(self.predicate)(&event) {
            debug!(event_type = event.event_type(), "Event filtered");
            DropReason::Filtered.record();
            return Ok(Outcome::Dropped(DropReason::Filtered));
        }
        next.run(event).await
    }
}

/// Replaces each event with a mapped copy before forwarding.
///
/// If the mapping fails the original event is forwarded unchanged.
pub struct TransformMiddleware {
    mapping: Mapping,
}

impl TransformMiddleware {
    pub fn new(
        mapping: impl Fn(&Event) -> Result<Event, HandlerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            mapping: Box::new(mapping),
        }
    }
}

#[async_trait]
impl Middleware for TransformMiddleware {
    fn name(&self) -> &'static str {
        "transform"
    }

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError> {
        match (self.mapping)(&event) {
            Ok(mapped) => next.run(mapped).await,
            Err(err) => {
                error!(
                    event_type = event.event_type(),
                    error = %err,
                    "Event transformation failed, forwarding original"
                );
                next.run(event).await
            }
        }
    }
}
