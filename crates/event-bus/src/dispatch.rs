//! # Message Dispatch Loop
//!
//! The single consumer task of a bus. It pulls raw messages from the
//! transport, decodes them, and invokes every matching subscription in turn.
//!
//! ## Delivery rules
//!
//! - Messages are handled in arrival order, one at a time.
//! - Subscriptions for one message run sequentially; each callback is awaited
//!   before the next starts.
//! - A failing or panicking callback is logged and counted. The remaining
//!   subscriptions still receive the message.
//! - Undecodable payloads are logged, counted, and dropped.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use bus_telemetry::{BUS_DISPATCH_LATENCY, BUS_ERRORS, BUS_MESSAGES_RECEIVED};

use crate::config::BusConfig;
use crate::error::BusError;
use crate::event::Event;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::stats::BusStats;
use crate::transport::{RawMessage, Transport};

/// State shared between a bus handle and its dispatch task.
pub(crate) struct BusCore {
    pub(crate) config: BusConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) stats: BusStats,
    pub(crate) running: AtomicBool,
}

impl BusCore {
    pub(crate) fn new(config: BusConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            registry: SubscriptionRegistry::new(),
            stats: BusStats::new(),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self, err: &BusError) {
        self.stats.record_error();
        BUS_ERRORS
            .with_label_values(&[self.config.service_name.as_str(), err.kind()])
            .inc();
    }
}

/// Run until the bus stops or the transport is gone.
pub(crate) async fn run(core: Arc<BusCore>) {
    info!(service = %core.config.service_name, "Event bus dispatch loop started");

    while core.is_running() {
        match core.transport.receive_one(core.config.poll_interval).await {
            Ok(None) => continue,
            Ok(Some(raw)) => {
                if !core.is_running() {
                    break;
                }
                deliver(&core, raw).await;
            }
            Err(err) => {
                let terminal = matches!(err, BusError::Disconnected(_) | BusError::NotConnected);
                if terminal || !core.is_running() {
                    if core.running.swap(false, Ordering::SeqCst) {
                        core.record_error(&err);
                        error!(
                            service = %core.config.service_name,
                            error = %err,
                            "Transport lost, stopping dispatch loop"
                        );
                    }
                    break;
                }

                core.record_error(&err);
                warn!(
                    service = %core.config.service_name,
                    error = %err,
                    backoff_ms = core.config.error_backoff.as_millis() as u64,
                    "Error receiving message"
                );
                tokio::time::sleep(core.config.error_backoff).await;
            }
        }
    }

    info!(service = %core.config.service_name, "Event bus dispatch loop stopped");
}

/// Decode one raw message and hand it to every matching subscription.
pub(crate) async fn deliver(core: &BusCore, raw: RawMessage) {
    let event = match Event::decode(&raw.payload) {
        Ok(event) => event,
        Err(err) => {
            core.record_error(&err);
            error!(channel = %raw.channel, error = %err, "Dropping undecodable message");
            return;
        }
    };

    core.stats.record_received();
    BUS_MESSAGES_RECEIVED
        .with_label_values(&[core.config.service_name.as_str(), event.event_type()])
        .inc();

    let subscriptions = core.registry.match_channel(&raw.channel);
    for subscription in &subscriptions {
        invoke(core, subscription, event.clone()).await;
    }

    debug!(
        channel = %raw.channel,
        event_type = event.event_type(),
        subscribers = subscriptions.len(),
        "Dispatched message"
    );
}

async fn invoke(core: &BusCore, subscription: &Subscription, event: Event) {
    subscription.record_delivery();
    let event_type = event.event_type().to_string();
    let started = Instant::now();

    let result = AssertUnwindSafe(subscription.callback().handle(event))
        .catch_unwind()
        .await;
    BUS_DISPATCH_LATENCY.observe(started.elapsed().as_secs_f64());

    let message = match result {
        Ok(Ok(())) => return,
        Ok(Err(err)) => format!("{err:#}"),
        Err(_) => "callback panicked".to_string(),
    };

    let err = BusError::Callback {
        pattern: subscription.pattern().to_string(),
        message,
    };
    core.record_error(&err);
    error!(
        pattern = subscription.pattern(),
        service = subscription.service_name(),
        event_type = %event_type,
        error = %err,
        "Subscriber callback failed"
    );
}
