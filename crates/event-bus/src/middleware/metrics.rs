//! In-process event counters and per-type latency windows.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::{Middleware, Next, Outcome};
use crate::catalog::EventType;
use crate::error::HandlerError;
use crate::event::Event;

/// Latency samples kept per event type.
pub const MAX_LATENCY_SAMPLES: usize = 100;

#[derive(Debug, Default)]
struct Counters {
    total_events: u64,
    by_type: HashMap<String, u64>,
    by_source: HashMap<String, u64>,
    by_priority: HashMap<&'static str, u64>,
    latencies: HashMap<String, VecDeque<Duration>>,
}

/// Point-in-time copy of the collected metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub events_by_source: BTreeMap<String, u64>,
    pub events_by_priority: BTreeMap<String, u64>,
    /// Mean processing time per type, in seconds.
    pub avg_processing_time: BTreeMap<String, f64>,
}

/// Counts events by type, source, and priority, and times the rest of the chain.
///
/// Counting happens before forwarding, so downstream drops are included.
/// A latency sample is recorded only when the rest of the chain succeeds;
/// errors are returned unchanged. Priority is counted for catalog types only.
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    counters: Mutex<Counters>,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock();
        MetricsSnapshot {
            total_events: counters.total_events,
            events_by_type: counters
                .by_type
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            events_by_source: counters
                .by_source
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            events_by_priority: counters
                .by_priority
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
            avg_processing_time: counters
                .latencies
                .iter()
                .filter(|(_, samples)| !samples.is_empty())
                .map(|(event_type, samples)| {
                    let total: Duration = samples.iter().sum();
                    (
                        event_type.clone(),
                        total.as_secs_f64() / samples.len() as f64,
                    )
                })
                .collect(),
        }
    }

    /// Latency samples currently held for one type.
    pub fn sample_count(&self, event_type: &str) -> usize {
        self.counters
            .lock()
            .latencies
            .get(event_type)
            .map_or(0, VecDeque::len)
    }

    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }

    fn count(&self, event: &Event) {
        let mut counters = self.counters.lock();
        counters.total_events += 1;
        *counters
            .by_type
            .entry(event.event_type().to_string())
            .or_default() += 1;

        let source = if event.source().is_empty() {
            "unknown"
        } else {
            event.source()
        };
        *counters.by_source.entry(source.to_string()).or_default() += 1;

        if let Ok(known) = EventType::from_str(event.event_type()) {
            *counters
                .by_priority
                .entry(known.priority().as_str())
                .or_default() += 1;
        }
    }

    fn record_latency(&self, event_type: String, elapsed: Duration) {
        let mut counters = self.counters.lock();
        let samples = counters.latencies.entry(event_type).or_default();
        samples.push_back(elapsed);
        while samples.len() > MAX_LATENCY_SAMPLES {
            samples.pop_front();
        }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError> {
        self.count(&event);
        let event_type = event.event_type().to_string();
        let started = Instant::now();

        let outcome = next.run(event).await?;
        self.record_latency(event_type, started.elapsed());
        Ok(outcome)
    }
}
