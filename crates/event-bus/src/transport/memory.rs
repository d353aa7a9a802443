//! # In-Memory Broker
//!
//! Process-local pub/sub broker. Every [`InMemoryTransport`] opened from the
//! same [`InMemoryBroker`] behaves like a separate broker connection with its
//! own channel/pattern interest set and its own unbounded inbound queue, so
//! several buses (one per service) can talk to each other inside one process.
//!
//! A message reaches a connection at most once, even when several of that
//! connection's channels and patterns match it.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{RawMessage, Transport};
use crate::error::BusError;
use crate::pattern::ChannelPattern;

struct Connection {
    channels: HashSet<String>,
    patterns: Vec<ChannelPattern>,
    sender: mpsc::UnboundedSender<RawMessage>,
}

impl Connection {
    fn wants(&self, channel: &str) -> bool {
        self.channels.contains(channel) || self.patterns.iter().any(|p| p.matches(channel))
    }

    fn has_interest(&self, pattern: &str) -> bool {
        self.channels.contains(pattern) || self.patterns.iter().any(|p| p.as_str() == pattern)
    }
}

struct BrokerInner {
    available: AtomicBool,
    next_connection_id: AtomicU64,
    connections: RwLock<HashMap<u64, Connection>>,
    messages_published: AtomicU64,
}

/// Shared in-process broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                available: AtomicBool::new(true),
                next_connection_id: AtomicU64::new(1),
                connections: RwLock::new(HashMap::new()),
                messages_published: AtomicU64::new(0),
            }),
        }
    }

    /// Open a new (not yet connected) transport on this broker.
    #[must_use]
    pub fn transport(&self) -> InMemoryTransport {
        InMemoryTransport::new(self.clone())
    }

    /// Mark the broker reachable or unreachable. Unreachable brokers refuse
    /// connections, pings, and publishes.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Make the broker unreachable and drop every open connection.
    pub fn shutdown(&self) {
        self.set_available(false);
        self.inner.connections.write().clear();
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Number of connections subscribed to this exact channel or pattern string.
    pub fn interest_count(&self, pattern: &str) -> usize {
        self.inner
            .connections
            .read()
            .values()
            .filter(|conn| conn.has_interest(pattern))
            .count()
    }

    pub fn messages_published(&self) -> u64 {
        self.inner.messages_published.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<(), BusError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BusError::Transport("broker unavailable".to_string()))
        }
    }

    fn open(&self) -> Result<(u64, mpsc::UnboundedReceiver<RawMessage>), BusError> {
        if !self.is_available() {
            return Err(BusError::Connection("broker unavailable".to_string()));
        }

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.connections.write().insert(
            id,
            Connection {
                channels: HashSet::new(),
                patterns: Vec::new(),
                sender,
            },
        );
        Ok((id, receiver))
    }

    fn close_connection(&self, id: u64) {
        self.inner.connections.write().remove(&id);
    }

    fn deliver(&self, channel: &str, payload: &[u8]) -> Result<usize, BusError> {
        self.check_available()?;
        self.inner.messages_published.fetch_add(1, Ordering::Relaxed);

        let connections = self.inner.connections.read();
        let delivered = connections
            .values()
            .filter(|conn| conn.wants(channel))
            .filter(|conn| {
                conn.sender
                    .send(RawMessage {
                        channel: channel.to_string(),
                        payload: payload.to_vec(),
                    })
                    .is_ok()
            })
            .count();
        Ok(delivered)
    }

    fn update_interest(
        &self,
        id: u64,
        pattern: &str,
        update: impl FnOnce(&mut Connection),
    ) -> Result<(), BusError> {
        let mut connections = self.inner.connections.write();
        let conn = connections
            .get_mut(&id)
            .ok_or_else(|| BusError::Disconnected(format!("connection {id} closed")))?;
        update(conn);
        debug!(connection = id, pattern, "Broker interest updated");
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// One connection to an [`InMemoryBroker`].
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    connection_id: Mutex<Option<u64>>,
    receiver: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<RawMessage>>>,
}

impl InMemoryTransport {
    fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            connection_id: Mutex::new(None),
            receiver: tokio::sync::Mutex::new(None),
        }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    fn connection(&self) -> Result<u64, BusError> {
        (*self.connection_id.lock()).ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<(), BusError> {
        if self.connection_id.lock().is_some() {
            return Ok(());
        }

        let (id, receiver) = self.broker.open()?;
        *self.receiver.lock().await = Some(receiver);
        *self.connection_id.lock() = Some(id);
        debug!(connection = id, "In-memory transport connected");
        Ok(())
    }

    async fn ping(&self) -> Result<(), BusError> {
        self.connection()?;
        self.broker.check_available()
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, BusError> {
        self.connection()?;
        self.broker.deliver(channel, payload)
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        let id = self.connection()?;
        let compiled = ChannelPattern::parse(pattern)?;
        self.broker.update_interest(id, pattern, |conn| {
            if compiled.is_wildcard() {
                if !conn.patterns.contains(&compiled) {
                    conn.patterns.push(compiled);
                }
            } else {
                conn.channels.insert(pattern.to_string());
            }
        })
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BusError> {
        let id = self.connection()?;
        self.broker.update_interest(id, pattern, |conn| {
            conn.channels.remove(pattern);
            conn.patterns.retain(|p| p.as_str() != pattern);
        })
    }

    async fn receive_one(&self, timeout: Duration) -> Result<Option<RawMessage>, BusError> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or(BusError::NotConnected)?;

        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(BusError::Disconnected(
                "broker dropped the connection".to_string(),
            )),
            Err(_) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        let id = self.connection_id.lock().take();
        if let Some(id) = id {
            // Dropping the sender wakes any pending receive with `Disconnected`.
            self.broker.close_connection(id);
            *self.receiver.lock().await = None;
            debug!(connection = id, "In-memory transport closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection_id.lock().is_some() && self.broker.is_available()
    }
}
