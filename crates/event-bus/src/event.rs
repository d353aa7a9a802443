//! # Event Envelope
//!
//! The immutable message exchanged on the bus. On the wire an event is a flat
//! JSON object:
//!
//! ```text
//! {"type": "game.move.executed", "payload": {...}, "source": "game_manager",
//!  "event_id": "game.42.moves_1700000000000", "published_at": "2024-..."}
//! ```
//!
//! `published_at` is stamped by the bus at publish time. `event_id` is kept
//! if the caller supplied one, otherwise the bus derives it from the channel
//! and the publish timestamp. Neither changes once assigned.
//!
//! Inbound `published_at` values may be RFC 3339 or a bare ISO-8601 local
//! timestamp without offset, which is read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::catalog::{priority_of, EventPriority, EventType};
use crate::error::BusError;

/// Event payload: string keys to arbitrary JSON values.
pub type Payload = serde_json::Map<String, Value>;

/// An event published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,

    #[serde(default)]
    payload: Payload,

    #[serde(default)]
    source: String,

    #[serde(default)]
    event_id: Option<String>,

    #[serde(default, deserialize_with = "deserialize_published_at")]
    published_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Create an unpublished event with an empty source.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            source: String::new(),
            event_id: None,
            published_at: None,
        }
    }

    /// Create an event for a catalogued type.
    #[must_use]
    pub fn of(event_type: EventType, payload: Payload) -> Self {
        Self::new(event_type.as_str(), payload)
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Pre-assign an identifier. Ignored if the event already has one.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        if self.event_id().is_none() {
            self.event_id = Some(event_id.into());
        }
        self
    }

    /// Replace the payload, keeping type, source, and identity.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The identifier, if one has been assigned. Empty ids count as absent.
    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    /// Catalog priority of this event's type.
    pub fn priority(&self) -> EventPriority {
        priority_of(&self.event_type)
    }

    /// Look up a payload field as a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Stamp publish metadata. Called by the bus only.
    pub(crate) fn stamp(&mut self, channel: &str, now: DateTime<Utc>) {
        self.published_at = Some(now);
        if self.event_id().is_none() {
            self.event_id = Some(format!("{channel}_{}", now.timestamp_millis()));
        }
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the wire format. Payloads without `type` are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, BusError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Parse an ISO-8601 timestamp, with or without UTC offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_published_at<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid published_at timestamp: {raw}"))
        }),
    }
}

/// Build a [`Payload`] from a JSON object literal.
///
/// Non-object values yield an empty payload.
#[must_use]
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}
