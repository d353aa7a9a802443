//! # Subscription Registry
//!
//! Maps channel patterns to ordered lists of subscriptions. The registry is
//! pure bookkeeping: the bus decides when a pattern needs a transport-level
//! subscribe or unsubscribe based on what `add` and `remove` report.
//!
//! Locks are held for a single map update only; matched subscriptions are
//! returned as `Arc`s so callbacks run without any registry lock held.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::callback::SharedCallback;
use crate::pattern::ChannelPattern;

/// Handle identifying one subscription, used to remove exactly that callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One callback registered under a pattern.
pub struct Subscription {
    id: SubscriptionId,
    pattern: String,
    callback: SharedCallback,
    service_name: String,
    created_at: DateTime<Utc>,
    message_count: AtomicU64,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn callback(&self) -> &SharedCallback {
        &self.callback
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Count one delivery. Returns the new total.
    pub(crate) fn record_delivery(&self) -> u64 {
        self.message_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            pattern: self.pattern.clone(),
            service_name: self.service_name.clone(),
            created_at: self.created_at,
            message_count: self.message_count(),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("service_name", &self.service_name)
            .field("created_at", &self.created_at)
            .field("message_count", &self.message_count())
            .finish()
    }
}

/// Diagnostic view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub pattern: String,
    pub service_name: String,
    pub created_at: DateTime<Utc>,
    pub message_count: u64,
}

/// Result of [`SubscriptionRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Removal {
    /// Number of subscriptions removed.
    pub removed: usize,
    /// The pattern has no subscriptions left and was deleted.
    pub pattern_released: bool,
}

struct PatternEntry {
    pattern: ChannelPattern,
    subscriptions: Vec<Arc<Subscription>>,
}

/// Pattern → subscriptions map.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, PatternEntry>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a pattern.
    ///
    /// Returns the new id and whether this is the first subscription for the
    /// pattern (the caller must then subscribe at the transport level).
    pub fn add(
        &self,
        pattern: ChannelPattern,
        callback: SharedCallback,
        service_name: &str,
    ) -> (SubscriptionId, bool) {
        let subscription = Arc::new(Subscription {
            id: SubscriptionId::new(),
            pattern: pattern.as_str().to_string(),
            callback,
            service_name: service_name.to_string(),
            created_at: Utc::now(),
            message_count: AtomicU64::new(0),
        });
        let id = subscription.id;

        let mut entries = self.entries.write();
        let mut first = false;
        let entry = entries
            .entry(pattern.as_str().to_string())
            .or_insert_with(|| {
                first = true;
                PatternEntry {
                    pattern,
                    subscriptions: Vec::new(),
                }
            });
        entry.subscriptions.push(subscription);

        (id, first)
    }

    /// Remove one subscription (by id) or every subscription of a pattern.
    pub fn remove(&self, pattern: &str, id: Option<SubscriptionId>) -> Removal {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(pattern) else {
            return Removal::default();
        };

        let before = entry.subscriptions.len();
        match id {
            Some(id) => entry.subscriptions.retain(|sub| sub.id != id),
            None => entry.subscriptions.clear(),
        }
        let removed = before - entry.subscriptions.len();

        let pattern_released = entry.subscriptions.is_empty();
        if pattern_released {
            entries.remove(pattern);
        }

        Removal {
            removed,
            pattern_released,
        }
    }

    /// All subscriptions whose pattern matches the channel.
    ///
    /// Registration order is preserved within a pattern; the order across
    /// patterns is unspecified.
    pub fn match_channel(&self, channel: &str) -> Vec<Arc<Subscription>> {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|entry| entry.pattern.matches(channel))
            .flat_map(|entry| entry.subscriptions.iter().cloned())
            .collect()
    }

    pub fn contains_pattern(&self, pattern: &str) -> bool {
        self.entries.read().contains_key(pattern)
    }

    /// Number of callbacks per pattern.
    pub fn pattern_counts(&self) -> BTreeMap<String, usize> {
        self.entries
            .read()
            .iter()
            .map(|(pattern, entry)| (pattern.clone(), entry.subscriptions.len()))
            .collect()
    }

    /// Total number of subscriptions across all patterns.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .map(|entry| entry.subscriptions.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn info(&self) -> Vec<SubscriptionInfo> {
        let entries = self.entries.read();
        let mut info: Vec<SubscriptionInfo> = entries
            .values()
            .flat_map(|entry| entry.subscriptions.iter().map(|sub| sub.info()))
            .collect();
        info.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        info
    }

    /// Drop every subscription, returning the patterns that were registered.
    pub fn clear(&self) -> Vec<String> {
        self.entries.write().drain().map(|(pattern, _)| pattern).collect()
    }
}
