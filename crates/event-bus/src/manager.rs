//! # Event Manager
//!
//! Per-service façade over a shared [`EventBus`]:
//!
//! - `emit` publishes events stamped with the service name as source
//! - `on` / `off` route events of one type to a single handler
//! - `request_response` / `reply` layer a request/response exchange over
//!   broadcast pub/sub using a dedicated `response.<request_id>` channel
//!
//! ## Request/response
//!
//! ```text
//! requester                                   responder
//!   subscribe response.<id>
//!   emit <type> {request_id, response_channel, ..}  ──►  on request:
//!                                                          reply(request, payload)
//!   ◄── <type>.response on response.<id> ─────────────────
//!   unsubscribe response.<id>
//! ```
//!
//! The response subscription is removed on every outcome. A request must not
//! be awaited from inside a callback running on the same bus: the dispatch
//! loop is busy with that callback and cannot deliver the response.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::callback::{callback_fn, EventCallback, SharedCallback};
use crate::error::{BusError, BusResult, HandlerError};
use crate::event::{Event, Payload};
use crate::registry::SubscriptionId;
use crate::EventBus;

/// Event type used by [`EventManager::notify_service_status`].
pub const SERVICE_STATUS_EVENT: &str = "service_status";

/// Suffix appended to a request type to form its response type.
pub const RESPONSE_SUFFIX: &str = ".response";

static LAST_REQUEST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Request id `<request_type>_<epoch_millis>`.
///
/// The millisecond component is strictly increasing within the process, so
/// two requests issued in the same millisecond still get distinct ids.
pub fn next_request_id(request_type: &str) -> String {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    let mut millis = now;
    let _ = LAST_REQUEST_MILLIS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        millis = now.max(last + 1);
        Some(millis)
    });
    format!("{request_type}_{millis}")
}

/// Channel a response to `request_id` is published on.
pub fn response_channel(request_id: &str) -> String {
    format!("response.{request_id}")
}

/// Type → handler table shared by every `on` subscription of a manager.
#[derive(Default)]
pub struct HandlerRouter {
    handlers: RwLock<HashMap<String, SharedCallback>>,
}

impl HandlerRouter {
    /// Install a handler, returning the one it replaced.
    pub fn insert(&self, event_type: &str, handler: SharedCallback) -> Option<SharedCallback> {
        self.handlers.write().insert(event_type.to_string(), handler)
    }

    pub fn remove(&self, event_type: &str) -> Option<SharedCallback> {
        self.handlers.write().remove(event_type)
    }

    pub fn get(&self, event_type: &str) -> Option<SharedCallback> {
        self.handlers.read().get(event_type).cloned()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.read().contains_key(event_type)
    }

    /// Registered types, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

/// Subscription callback for one `on` registration.
///
/// Only events whose type equals `event_type` reach the handler, so
/// overlapping `*<type>*` patterns never invoke a handler twice.
struct TypedDispatch {
    event_type: String,
    router: Arc<HandlerRouter>,
}

#[async_trait]
impl EventCallback for TypedDispatch {
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        if event.event_type() != self.event_type {
            return Ok(());
        }
        let Some(handler) = self.router.get(&self.event_type) else {
            return Ok(());
        };

        if let Err(err) = handler.handle(event).await {
            error!(event_type = %self.event_type, error = %err, "Error in event handler");
        }
        Ok(())
    }
}

/// Owns a request's `response.<id>` subscription.
///
/// Released explicitly when the request completes. If the request future is
/// dropped first, `Drop` spawns the unsubscribe on the current runtime.
struct ResponseGuard {
    armed: Option<(Arc<EventBus>, String, SubscriptionId)>,
}

impl ResponseGuard {
    fn new(bus: Arc<EventBus>, channel: String, id: SubscriptionId) -> Self {
        Self {
            armed: Some((bus, channel, id)),
        }
    }

    async fn release(mut self) {
        if let Some((bus, channel, id)) = self.armed.clone() {
            remove_response_subscription(&bus, &channel, id).await;
        }
        self.armed = None;
    }
}

impl Drop for ResponseGuard {
    fn drop(&mut self) {
        let Some((bus, channel, id)) = self.armed.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(channel = %channel, "Request abandoned, removing response subscription");
                handle.spawn(async move {
                    remove_response_subscription(&bus, &channel, id).await;
                });
            }
            Err(_) => {
                warn!(channel = %channel, "No runtime to remove abandoned response subscription");
            }
        }
    }
}

async fn remove_response_subscription(bus: &EventBus, channel: &str, id: SubscriptionId) {
    if let Err(err) = bus.unsubscribe(channel, Some(id)).await {
        warn!(channel = %channel, error = %err, "Failed to remove response subscription");
    }
}

/// Higher-level event API for one service.
pub struct EventManager {
    bus: Arc<EventBus>,
    service_name: String,
    router: Arc<HandlerRouter>,
    subscriptions: tokio::sync::Mutex<HashMap<String, SubscriptionId>>,
    request_timeout: Duration,
}

impl EventManager {
    pub fn new(bus: Arc<EventBus>, service_name: impl Into<String>) -> Self {
        let request_timeout = bus.config().request_timeout;
        Self {
            bus,
            service_name: service_name.into(),
            router: Arc::new(HandlerRouter::default()),
            subscriptions: tokio::sync::Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn router(&self) -> &HandlerRouter {
        &self.router
    }

    /// `service.<name>.events`
    pub fn default_channel(&self) -> String {
        format!("service.{}.events", self.service_name)
    }

    /// Publish an event from this service on `channel`, or on
    /// [`default_channel`](Self::default_channel) if none is given.
    pub async fn emit(
        &self,
        event_type: &str,
        payload: Payload,
        channel: Option<&str>,
    ) -> BusResult<usize> {
        let channel = channel.map_or_else(|| self.default_channel(), str::to_string);
        let event = Event::new(event_type, payload).with_source(self.service_name.as_str());
        self.bus.publish(&channel, event).await
    }

    /// Route events of `event_type` to `handler`.
    ///
    /// Subscribes to `*<event_type>*` the first time a type is registered;
    /// registering again replaces the handler. Handler errors are logged and
    /// not propagated.
    pub async fn on(&self, event_type: &str, handler: SharedCallback) -> BusResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        let previous = self.router.insert(event_type, handler);

        if subscriptions.contains_key(event_type) {
            debug!(event_type, "Replaced event handler");
            return Ok(());
        }

        let pattern = format!("*{event_type}*");
        let dispatch = Arc::new(TypedDispatch {
            event_type: event_type.to_string(),
            router: Arc::clone(&self.router),
        });
        match self
            .bus
            .subscribe_as(&pattern, dispatch, &self.service_name)
            .await
        {
            Ok(id) => {
                subscriptions.insert(event_type.to_string(), id);
                info!(event_type, pattern = %pattern, "Registered event handler");
                Ok(())
            }
            Err(err) => {
                match previous {
                    Some(previous) => {
                        self.router.insert(event_type, previous);
                    }
                    None => {
                        self.router.remove(event_type);
                    }
                }
                Err(err)
            }
        }
    }

    /// Remove the handler for `event_type`. Returns whether one was registered.
    pub async fn off(&self, event_type: &str) -> BusResult<bool> {
        let mut subscriptions = self.subscriptions.lock().await;
        let had_handler = self.router.remove(event_type).is_some();

        if let Some(id) = subscriptions.remove(event_type) {
            self.bus
                .unsubscribe(&format!("*{event_type}*"), Some(id))
                .await?;
        }
        Ok(had_handler)
    }

    /// [`request_response`](Self::request_response) with the default timeout.
    pub async fn request(&self, request_type: &str, payload: Payload) -> BusResult<Payload> {
        self.request_response(request_type, payload, self.request_timeout)
            .await
    }

    /// Emit a request and wait up to `timeout` for the first response.
    ///
    /// The request payload is `{request_id, response_channel, ..payload}`.
    /// Returns the response payload, or [`BusError::Timeout`].
    pub async fn request_response(
        &self,
        request_type: &str,
        payload: Payload,
        timeout: Duration,
    ) -> BusResult<Payload> {
        let request_id = next_request_id(request_type);
        let channel = response_channel(&request_id);

        let (tx, rx) = oneshot::channel::<Event>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let on_response = callback_fn(move |event| {
            let slot = Arc::clone(&slot);
            async move {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(event);
                }
                Ok(())
            }
        });
        let subscription = self
            .bus
            .subscribe_as(&channel, on_response, &self.service_name)
            .await?;
        let guard = ResponseGuard::new(Arc::clone(&self.bus), channel.clone(), subscription);

        let mut body = Payload::new();
        body.insert("request_id".to_string(), Value::String(request_id.clone()));
        body.insert("response_channel".to_string(), Value::String(channel.clone()));
        body.extend(payload);

        let result = match self.emit(request_type, body, None).await {
            Ok(_) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(response)) => Ok(response.into_payload()),
                Ok(Err(_)) => Err(BusError::Disconnected(
                    "response subscription dropped".to_string(),
                )),
                Err(_) => Err(BusError::Timeout {
                    request_type: request_type.to_string(),
                    timeout,
                }),
            },
            Err(err) => Err(err),
        };

        guard.release().await;

        match &result {
            Ok(_) => debug!(request_id = %request_id, "Request answered"),
            Err(err) => warn!(request_id = %request_id, error = %err, "Request failed"),
        }
        result
    }

    /// Answer a request received from another service.
    ///
    /// Publishes `<request type>.response` on the request's
    /// `response_channel`. The request id is added to the payload when absent.
    pub async fn reply(&self, request: &Event, payload: Payload) -> BusResult<usize> {
        let channel = request.payload_str("response_channel").ok_or_else(|| {
            BusError::InvalidRequest(format!(
                "{} has no response_channel",
                request.event_type()
            ))
        })?;

        let mut body = payload;
        if let Some(request_id) = request.payload_str("request_id") {
            body.entry("request_id")
                .or_insert_with(|| Value::String(request_id.to_string()));
        }

        let response_type = format!("{}{RESPONSE_SUFFIX}", request.event_type());
        self.emit(&response_type, body, Some(channel)).await
    }

    /// Announce this service's status on `service.<name>.status`.
    pub async fn notify_service_status(&self, status: &str) -> BusResult<usize> {
        let payload = crate::event::payload(json!({
            "service": self.service_name,
            "status": status,
            "timestamp": Utc::now().to_rfc3339(),
        }));
        let channel = format!("service.{}.status", self.service_name);
        self.emit(SERVICE_STATUS_EVENT, payload, Some(&channel)).await
    }
}
