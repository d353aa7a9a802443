//! # Transport Adapters
//!
//! A transport owns the connection to the pub/sub broker and exposes a plain
//! `{channel, payload}` message abstraction. It does no routing: the bus
//! decides which callbacks receive a message.
//!
//! Exact channel names use the plain subscribe path; patterns containing `*`
//! or `?` use pattern subscriptions.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::BusError;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{InMemoryBroker, InMemoryTransport};
#[cfg(feature = "redis")]
pub use self::redis::RedisTransport;

/// A raw inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Connection to a pub/sub broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the link and probe it. Fails with [`BusError::Connection`].
    async fn connect(&self) -> Result<(), BusError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), BusError>;

    /// Send one message. Returns a best-effort count of receiving connections.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, BusError>;

    /// Register interest in a channel or pattern.
    async fn subscribe(&self, pattern: &str) -> Result<(), BusError>;

    /// Drop interest in a channel or pattern.
    async fn unsubscribe(&self, pattern: &str) -> Result<(), BusError>;

    /// Wait up to `timeout` for one message. `Ok(None)` means the wait expired.
    ///
    /// Returns [`BusError::Disconnected`] once the connection is gone for good.
    async fn receive_one(&self, timeout: Duration) -> Result<Option<RawMessage>, BusError>;

    /// Release the connection. Calling it twice is harmless.
    async fn close(&self) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;
}
