//! Prometheus metrics for the event bus.
//!
//! All metrics follow the naming convention: `bus_<area>_<metric>_<unit>`
//!
//! The collectors are process-wide statics. They count from the first use
//! whether or not [`register_metrics`] has been called; registration only
//! makes them visible through [`REGISTRY`] and [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TRAFFIC
    // =========================================================================

    /// Events published, by service and channel root (`game`, `service`, `response`, ...)
    pub static ref BUS_MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("bus_messages_published_total", "Events published to the transport"),
        &["service", "channel_kind"]
    ).expect("metric creation failed");

    /// Events decoded by the dispatch loop, by service and event type
    pub static ref BUS_MESSAGES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("bus_messages_received_total", "Events received from the transport"),
        &["service", "event_type"]
    ).expect("metric creation failed");

    /// Live subscriptions per service
    pub static ref BUS_SUBSCRIPTIONS: GaugeVec = GaugeVec::new(
        Opts::new("bus_subscriptions", "Number of registered callbacks"),
        &["service"]
    ).expect("metric creation failed");

    /// Time spent in one subscriber callback
    pub static ref BUS_DISPATCH_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "bus_dispatch_latency_seconds",
            "Time spent delivering one event to one subscriber"
        ).buckets(exponential_buckets(0.0001, 2.0, 15).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // FAILURES
    // =========================================================================

    /// Bus errors by service and error kind
    pub static ref BUS_ERRORS: CounterVec = CounterVec::new(
        Opts::new("bus_errors_total", "Errors raised on the bus"),
        &["service", "kind"]
    ).expect("metric creation failed");

    /// Events dropped by middleware, by reason
    pub static ref MIDDLEWARE_DROPS: CounterVec = CounterVec::new(
        Opts::new("bus_middleware_drops_total", "Events dropped by middleware"),
        &["reason"]  // rate_limited/filtered/queue_full
    ).expect("metric creation failed");
}

/// Proof that the bus metrics are registered with [`REGISTRY`].
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

/// Register all bus metrics with the global registry.
///
/// Calling it again is harmless: already-registered collectors are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BUS_MESSAGES_PUBLISHED.clone()),
        Box::new(BUS_MESSAGES_RECEIVED.clone()),
        Box::new(BUS_SUBSCRIPTIONS.clone()),
        Box::new(BUS_DISPATCH_LATENCY.clone()),
        Box::new(BUS_ERRORS.clone()),
        Box::new(MIDDLEWARE_DROPS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _private: () })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// First dot-separated segment of a channel, used as a low-cardinality label.
pub fn channel_kind(channel: &str) -> &str {
    channel.split('.').next().unwrap_or(channel)
}
