//! Cross-service flows over one in-memory broker.

pub mod fanout;
pub mod lifecycle;
pub mod pipeline;
pub mod requests;
pub mod telemetry;

use event_bus::{callback_fn, BusConfig, Event, EventBus, InMemoryBroker, SharedCallback};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll interval used by every test bus.
pub const TEST_POLL: Duration = Duration::from_millis(20);

/// How long a test waits for an expected delivery.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected bus for `service` on `broker`.
pub async fn connected_bus(broker: &InMemoryBroker, service: &str) -> Arc<EventBus> {
    let config = BusConfig::for_service(service).with_poll_interval(TEST_POLL);
    let bus = Arc::new(EventBus::in_memory(config, broker));
    bus.connect().await.expect("bus should connect");
    bus
}

/// Callback forwarding every event into a channel.
pub fn forward(tx: mpsc::UnboundedSender<Event>) -> SharedCallback {
    callback_fn(move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
            Ok(())
        }
    })
}

/// Next event, or panic after [`DELIVERY_TIMEOUT`].
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(DELIVERY_TIMEOUT, rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("channel closed")
}

/// Assert nothing arrives within a short grace period.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Event>) {
    tokio::time::sleep(TEST_POLL * 5).await;
    assert!(rx.try_recv().is_err(), "unexpected delivery");
}
