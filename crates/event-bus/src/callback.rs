//! # Event Callbacks
//!
//! The single invocation convention for subscribers: receive one event,
//! return nothing, possibly fail. The dispatch loop awaits every callback
//! before moving on to the next subscriber.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::event::Event;

/// A unit of behavior invoked with one delivered event.
#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

/// Shared, type-erased callback as stored by the registry.
pub type SharedCallback = Arc<dyn EventCallback>;

/// Adapter turning an async closure into an [`EventCallback`].
pub struct FnCallback<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventCallback for FnCallback<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

/// Wrap an async closure as a shared callback.
///
/// ```rust,ignore
/// let cb = callback_fn(|event| async move {
///     tracing::info!(event_type = event.event_type(), "got event");
///     Ok(())
/// });
/// ```
pub fn callback_fn<F, Fut>(f: F) -> SharedCallback
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnCallback { f })
}
