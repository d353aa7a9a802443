//! # Redis Transport
//!
//! Pub/sub over Redis. Publishing goes through a multiplexed connection;
//! inbound traffic arrives on a dedicated pub/sub connection using
//! `SUBSCRIBE` for exact channels and `PSUBSCRIBE` for glob patterns.
//!
//! Redis sends one frame per matching subscription, so a publish matching an
//! exact channel and a pattern (or two patterns) arrives more than once. Those
//! duplicates are collapsed here: a pattern frame is kept only when no exact
//! subscription covers the channel and its pattern is the first matching one
//! in sort order.
//!
//! `receive_one` holds the pub/sub connection while it waits, so a concurrent
//! subscribe can be delayed by up to one poll interval.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{Client, Msg};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{RawMessage, Transport};
use crate::error::BusError;
use crate::pattern::ChannelPattern;

#[derive(Default)]
struct Interest {
    channels: BTreeSet<String>,
    patterns: BTreeMap<String, ChannelPattern>,
}

impl Interest {
    /// Whether a frame should be surfaced to the bus.
    fn accepts(&self, channel: &str, via_pattern: Option<&str>) -> bool {
        let Some(pattern) = via_pattern else {
            return true;
        };
        if self.channels.contains(channel) {
            return false;
        }
        self.patterns
            .values()
            .find(|p| p.matches(channel))
            .map_or(true, |first| first.as_str() == pattern)
    }
}

/// Redis-backed [`Transport`].
pub struct RedisTransport {
    url: String,
    client: Mutex<Option<Client>>,
    publisher: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    pubsub: tokio::sync::Mutex<Option<PubSub>>,
    interest: RwLock<Interest>,
}

impl RedisTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Mutex::new(None),
            publisher: tokio::sync::Mutex::new(None),
            pubsub: tokio::sync::Mutex::new(None),
            interest: RwLock::new(Interest::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, BusError> {
        // Multiplexed connections are cheap clones sharing one socket.
        self.publisher
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or(BusError::NotConnected)
    }
}

fn transport_error(err: redis::RedisError) -> BusError {
    if err.is_connection_dropped() || err.is_io_error() {
        BusError::Disconnected(err.to_string())
    } else {
        BusError::Transport(err.to_string())
    }
}

fn frame_pattern(msg: &Msg) -> Option<String> {
    if msg.from_pattern() {
        msg.get_pattern::<String>().ok()
    } else {
        None
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn connect(&self) -> Result<(), BusError> {
        if self.is_connected() {
            return Ok(());
        }

        let client =
            Client::open(self.url.as_str()).map_err(|e| BusError::Connection(e.to_string()))?;
        let mut publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<String>(&mut publisher)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        *self.publisher.lock().await = Some(publisher);
        *self.pubsub.lock().await = Some(pubsub);
        *self.client.lock() = Some(client);
        info!(url = %self.url, "Connected to Redis");
        Ok(())
    }

    async fn ping(&self) -> Result<(), BusError> {
        let mut conn = self.publisher().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(transport_error)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, BusError> {
        let mut conn = self.publisher().await?;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<usize>(&mut conn)
            .await
            .map_err(transport_error)
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        let compiled = ChannelPattern::parse(pattern)?;
        let mut guard = self.pubsub.lock().await;
        let pubsub = guard.as_mut().ok_or(BusError::NotConnected)?;

        if compiled.is_wildcard() {
            pubsub.psubscribe(pattern).await.map_err(transport_error)?;
            self.interest
                .write()
                .patterns
                .insert(pattern.to_string(), compiled);
        } else {
            pubsub.subscribe(pattern).await.map_err(transport_error)?;
            self.interest.write().channels.insert(pattern.to_string());
        }
        debug!(pattern, "Redis subscription added");
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BusError> {
        let mut guard = self.pubsub.lock().await;
        let pubsub = guard.as_mut().ok_or(BusError::NotConnected)?;

        if crate::pattern::is_wildcard(pattern) {
            pubsub.punsubscribe(pattern).await.map_err(transport_error)?;
            self.interest.write().patterns.remove(pattern);
        } else {
            pubsub.unsubscribe(pattern).await.map_err(transport_error)?;
            self.interest.write().channels.remove(pattern);
        }
        debug!(pattern, "Redis subscription removed");
        Ok(())
    }

    async fn receive_one(&self, timeout: Duration) -> Result<Option<RawMessage>, BusError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut guard = self.pubsub.lock().await;
        let pubsub = guard.as_mut().ok_or(BusError::NotConnected)?;
        let mut stream = pubsub.on_message();

        loop {
            let msg = match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    return Err(BusError::Disconnected(
                        "Redis pub/sub stream ended".to_string(),
                    ))
                }
                Err(_) => return Ok(None),
            };

            let channel = msg.get_channel_name().to_string();
            let pattern = frame_pattern(&msg);
            if !self.interest.read().accepts(&channel, pattern.as_deref()) {
                debug!(channel = %channel, ?pattern, "Skipping duplicate Redis frame");
                continue;
            }

            return Ok(Some(RawMessage {
                channel,
                payload: msg.get_payload_bytes().to_vec(),
            }));
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        let had_client = self.client.lock().take().is_some();
        *self.publisher.lock().await = None;
        *self.pubsub.lock().await = None;
        *self.interest.write() = Interest::default();

        if had_client {
            info!(url = %self.url, "Redis connection closed");
        } else {
            warn!(url = %self.url, "Close called on an unconnected Redis transport");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.lock().is_some()
    }
}
