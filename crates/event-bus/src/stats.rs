//! # Bus Statistics
//!
//! Process-wide counters for one bus instance plus the health report shape.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by the publish, dispatch, and error paths.
#[derive(Debug, Default)]
pub struct BusStats {
    messages_published: AtomicU64,
    messages_received: AtomicU64,
    subscriptions_count: AtomicU64,
    errors_count: AtomicU64,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl BusStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_subscriptions(&self, n: usize) {
        self.subscriptions_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn remove_subscriptions(&self, n: usize) {
        let _ = self
            .subscriptions_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(n as u64))
            });
    }

    pub fn mark_started(&self, at: DateTime<Utc>) {
        *self.started_at.write() = Some(at);
    }

    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn subscriptions_count(&self) -> u64 {
        self.subscriptions_count.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }

    /// Reset message and error counters. Subscriptions and start time stay.
    pub fn clear(&self) {
        self.messages_published.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.errors_count.store(0, Ordering::Relaxed);
    }

    /// Point-in-time view combined with registry and connection state.
    pub fn snapshot(
        &self,
        subscriptions: BTreeMap<String, usize>,
        is_connected: bool,
        now: DateTime<Utc>,
    ) -> StatsSnapshot {
        let started_at = self.started_at();
        let uptime_seconds = started_at
            .map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        StatsSnapshot {
            messages_published: self.messages_published(),
            messages_received: self.messages_received(),
            errors_count: self.errors_count(),
            subscriptions_count: self.subscriptions_count(),
            subscriptions,
            uptime_seconds,
            is_connected,
            started_at,
        }
    }
}

/// Serializable statistics report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub messages_published: u64,
    pub messages_received: u64,
    pub errors_count: u64,
    pub subscriptions_count: u64,
    /// Pattern → number of callbacks.
    pub subscriptions: BTreeMap<String, usize>,
    pub uptime_seconds: f64,
    pub is_connected: bool,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsSnapshot>,
}

impl HealthReport {
    pub fn healthy(stats: StatsSnapshot) -> Self {
        Self {
            status: HealthStatus::Healthy,
            reason: None,
            stats: Some(stats),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            reason: Some(reason.into()),
            stats: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
