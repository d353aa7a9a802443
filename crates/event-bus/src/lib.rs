//! # Event Bus - Pub/Sub Messaging Between Services
//!
//! Services exchange typed JSON events over a pub/sub transport. A bus owns
//! one transport connection, a registry of pattern subscriptions, and a
//! dispatch task that delivers each incoming message to every matching
//! callback.
//!
//! ```text
//! ┌──────────────┐   publish()    ┌─────────────┐   subscribe()   ┌──────────────┐
//! │  Service A   │ ─────────────► │  Transport  │ ◄────────────── │  Service B   │
//! │  EventBus    │                │ (memory or  │                 │  EventBus    │
//! └──────────────┘                │   Redis)    │ ──────────────► │  dispatch    │
//!                                 └─────────────┘    deliver      │  → callbacks │
//!                                                                 └──────────────┘
//! ```
//!
//! ## Layers
//!
//! - [`EventBus`]: connect, publish, subscribe/unsubscribe, stats, health
//! - [`EventManager`]: per-service emit, typed handlers, request/response
//! - [`middleware::MiddlewareChain`]: ordered interceptors wrapped around a callback
//!
//! ## Channels
//!
//! Channel names are dot-separated (`game.<id>.moves`). Subscriptions may use
//! glob patterns: `*` matches any run of characters including dots, `?` one
//! character, `[..]` a set. Matching is case-sensitive.
//!
//! ## Delivery
//!
//! Delivery is at-most-once with no persistence. A bus processes messages one
//! at a time in arrival order; a failing callback is logged and counted and
//! never stops delivery to the others.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod callback;
pub mod catalog;
pub mod config;
mod dispatch;
pub mod error;
pub mod event;
pub mod manager;
pub mod middleware;
pub mod pattern;
pub mod registry;
pub mod stats;
pub mod transport;

// Re-export main types
pub use bus::EventBus;
pub use callback::{callback_fn, EventCallback, SharedCallback};
pub use catalog::{EventCategory, EventPriority, EventType};
pub use config::BusConfig;
pub use error::{BusError, BusResult, HandlerError};
pub use event::{payload, Event, Payload};
pub use manager::EventManager;
pub use middleware::{DropReason, Middleware, MiddlewareChain, Next, Outcome};
pub use pattern::ChannelPattern;
pub use registry::{SubscriptionId, SubscriptionInfo};
pub use stats::{HealthReport, HealthStatus, StatsSnapshot};
pub use transport::{InMemoryBroker, InMemoryTransport, RawMessage, Transport};

#[cfg(feature = "redis")]
pub use transport::RedisTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports_resolve() {
        let config = BusConfig::for_service("svc");
        let broker = InMemoryBroker::new();
        let bus = EventBus::in_memory(config, &broker);
        assert_eq!(bus.service_name(), "svc");
        assert!(!bus.is_connected());
    }

    #[test]
    fn test_wildcard_crosses_dots() {
        let pattern = ChannelPattern::parse("game.*").unwrap();
        assert!(pattern.matches("game.abc.moves"));
        assert!(!pattern.matches("Game.abc"));
    }
}
