//! # Event Bus
//!
//! Process-local façade over a [`Transport`]. A bus is constructed
//! explicitly, connected, shared as `Arc<EventBus>`, and closed by its owner:
//!
//! ```rust,ignore
//! let broker = InMemoryBroker::new();
//! let bus = Arc::new(EventBus::in_memory(BusConfig::for_service("game_manager"), &broker));
//! bus.connect().await?;
//!
//! bus.subscribe("game.*", callback_fn(|event| async move {
//!     tracing::info!(event_type = event.event_type(), "game event");
//!     Ok(())
//! })).await?;
//!
//! bus.publish("game.created", Event::new("game.created", Payload::new())).await?;
//! bus.close().await?;
//! ```
//!
//! Registry changes and the matching transport subscribe/unsubscribe happen
//! under one async lock, so the transport's interest set always mirrors the
//! registry's patterns.

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bus_telemetry::{channel_kind, metric_inc, BUS_MESSAGES_PUBLISHED, BUS_SUBSCRIPTIONS};

use crate::callback::SharedCallback;
use crate::config::BusConfig;
use crate::dispatch::{self, BusCore};
use crate::error::{BusError, BusResult};
use crate::event::Event;
use crate::pattern::ChannelPattern;
use crate::registry::{SubscriptionId, SubscriptionInfo};
use crate::stats::{HealthReport, StatsSnapshot};
use crate::transport::{InMemoryBroker, Transport};

/// Pub/sub event bus with pattern subscriptions.
pub struct EventBus {
    core: Arc<BusCore>,
    subscription_lock: tokio::sync::Mutex<()>,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus over an arbitrary transport. Nothing happens until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: BusConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            core: Arc::new(BusCore::new(config, transport)),
            subscription_lock: tokio::sync::Mutex::new(()),
            dispatcher: parking_lot::Mutex::new(None),
        }
    }

    /// Create a bus on a new connection to an in-process broker.
    #[must_use]
    pub fn in_memory(config: BusConfig, broker: &InMemoryBroker) -> Self {
        Self::new(config, Arc::new(broker.transport()))
    }

    /// Create a bus talking to Redis at `config.transport_url`.
    #[cfg(feature = "redis")]
    #[must_use]
    pub fn redis(config: BusConfig) -> Self {
        let transport = crate::transport::RedisTransport::new(config.transport_url.clone());
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &BusConfig {
        &self.core.config
    }

    pub fn service_name(&self) -> &str {
        &self.core.config.service_name
    }

    /// Connect the transport and start the dispatch loop.
    ///
    /// Connection failures are returned to the caller and not retried.
    pub async fn connect(&self) -> BusResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        if let Err(err) = self.core.transport.connect().await {
            error!(service = %self.service_name(), error = %err, "Failed to connect event bus");
            return Err(err);
        }

        self.core.running.store(true, Ordering::SeqCst);
        self.core.stats.mark_started(Utc::now());

        let handle = tokio::spawn(dispatch::run(Arc::clone(&self.core)));
        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }

        info!(service = %self.service_name(), "Event bus connected");
        Ok(())
    }

    /// Stop dispatching, drop every subscription, and release the transport.
    ///
    /// Safe to call more than once. In-flight callbacks run to completion.
    pub async fn close(&self) -> BusResult<()> {
        let was_running = self.core.running.swap(false, Ordering::SeqCst);

        {
            let _guard = self.subscription_lock.lock().await;
            let removed = self.core.registry.len();
            let patterns = self.core.registry.clear();
            self.core.stats.remove_subscriptions(removed);

            if self.core.transport.is_connected() {
                for pattern in &patterns {
                    if let Err(err) = self.core.transport.unsubscribe(pattern).await {
                        debug!(pattern = %pattern, error = %err, "Unsubscribe during close failed");
                    }
                }
            }
            self.update_subscription_gauge();
        }

        if let Err(err) = self.core.transport.close().await {
            self.core.record_error(&err);
            error!(service = %self.service_name(), error = %err, "Failed to close transport");
            return Err(err);
        }

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            // Bounded so a close issued from inside a callback cannot wait on itself.
            let grace = self.core.config.poll_interval * 2;
            if tokio::time::timeout(grace, handle).await.is_err() {
                debug!(service = %self.service_name(), "Dispatch loop still finishing after close");
            }
        }

        if was_running {
            info!(service = %self.service_name(), "Event bus closed");
        }
        Ok(())
    }

    /// `true` while the dispatch loop runs over a live transport.
    pub fn is_connected(&self) -> bool {
        self.core.is_running() && self.core.transport.is_connected()
    }

    /// Stamp and publish an event on a channel.
    ///
    /// Returns the transport's best-effort receiver count.
    pub async fn publish(&self, channel: &str, mut event: Event) -> BusResult<usize> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }

        event.stamp(channel, Utc::now());
        let result = match event.encode() {
            Ok(bytes) => self.core.transport.publish(channel, &bytes).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(receivers) => {
                self.core.stats.record_published();
                metric_inc!(
                    BUS_MESSAGES_PUBLISHED,
                    &[self.service_name(), channel_kind(channel)]
                );
                debug!(
                    channel,
                    event_type = event.event_type(),
                    event_id = event.event_id().unwrap_or_default(),
                    receivers,
                    "Published event"
                );
                Ok(receivers)
            }
            Err(err) => {
                self.core.record_error(&err);
                error!(channel, event_type = event.event_type(), error = %err, "Failed to publish event");
                Err(err)
            }
        }
    }

    /// Register a callback under a channel or glob pattern, owned by this bus's service.
    pub async fn subscribe(
        &self,
        pattern: &str,
        callback: SharedCallback,
    ) -> BusResult<SubscriptionId> {
        let service_name = self.core.config.service_name.clone();
        self.subscribe_as(pattern, callback, &service_name).await
    }

    /// Register a callback with an explicit owner label.
    ///
    /// The first subscription for a pattern subscribes at the transport.
    /// If that fails the registry entry is rolled back.
    pub async fn subscribe_as(
        &self,
        pattern: &str,
        callback: SharedCallback,
        service_name: &str,
    ) -> BusResult<SubscriptionId> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        let compiled = ChannelPattern::parse(pattern)?;

        let _guard = self.subscription_lock.lock().await;
        let (id, first) = self.core.registry.add(compiled, callback, service_name);

        if first {
            if let Err(err) = self.core.transport.subscribe(pattern).await {
                self.core.registry.remove(pattern, Some(id));
                self.core.record_error(&err);
                error!(pattern, error = %err, "Failed to subscribe");
                return Err(err);
            }
        }

        self.core.stats.add_subscriptions(1);
        self.update_subscription_gauge();
        info!(pattern, service = service_name, subscription = %id, "Subscribed to pattern");
        Ok(id)
    }

    /// Remove one subscription (by id) or every subscription of a pattern.
    ///
    /// When the pattern has no callbacks left the transport subscription is
    /// released. Returns the number of callbacks removed; unknown patterns
    /// are a no-op.
    pub async fn unsubscribe(&self, pattern: &str, id: Option<SubscriptionId>) -> BusResult<usize> {
        let _guard = self.subscription_lock.lock().await;
        let removal = self.core.registry.remove(pattern, id);
        if removal.removed == 0 {
            return Ok(0);
        }

        self.core.stats.remove_subscriptions(removal.removed);
        self.update_subscription_gauge();

        if removal.pattern_released && self.core.transport.is_connected() {
            if let Err(err) = self.core.transport.unsubscribe(pattern).await {
                self.core.record_error(&err);
                warn!(pattern, error = %err, "Failed to release transport subscription");
                return Err(err);
            }
        }

        info!(
            pattern,
            removed = removal.removed,
            released = removal.pattern_released,
            "Unsubscribed from pattern"
        );
        Ok(removal.removed)
    }

    /// Whether any callback is registered under exactly this pattern.
    pub fn has_subscription(&self, pattern: &str) -> bool {
        self.core.registry.contains_pattern(pattern)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot(
            self.core.registry.pattern_counts(),
            self.is_connected(),
            Utc::now(),
        )
    }

    /// Every live subscription, oldest first.
    pub fn subscription_info(&self) -> Vec<SubscriptionInfo> {
        self.core.registry.info()
    }

    /// Reset published/received/error counters.
    pub fn clear_stats(&self) {
        self.core.stats.clear();
    }

    /// Probe the transport and report health with current statistics.
    pub async fn health_check(&self) -> HealthReport {
        if !self.is_connected() {
            return HealthReport::unhealthy("not_connected");
        }

        match self.core.transport.ping().await {
            Ok(()) => HealthReport::healthy(self.stats()),
            Err(err) => HealthReport::unhealthy(err.to_string()),
        }
    }

    fn update_subscription_gauge(&self) {
        BUS_SUBSCRIPTIONS
            .with_label_values(&[self.service_name()])
            .set(self.core.registry.len() as f64);
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // The dispatch task notices on its next poll and exits.
        self.core.running.store(false, Ordering::SeqCst);
    }
}
