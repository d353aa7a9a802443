//! # Bus Telemetry
//!
//! Bus traffic shows up in the Prometheus exposition.

#[cfg(test)]
mod tests {
    use super::super::*;
    use bus_telemetry::{encode_metrics, register_metrics, TelemetryConfig};
    use event_bus::middleware::{RateLimitConfig, RateLimitMiddleware};
    use event_bus::{EventType, MiddlewareChain, Payload};

    #[tokio::test]
    async fn test_traffic_recorded_in_prometheus_registry() {
        register_metrics().unwrap();
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "metrics_publisher").await;
        let listener = connected_bus(&broker, "metrics_listener").await;

        let chain = MiddlewareChain::new().with(RateLimitMiddleware::new(RateLimitConfig::global(
            1,
            Duration::from_secs(60),
        )));
        let (tx, mut rx) = mpsc::unbounded_channel();
        listener
            .subscribe("calibration.*", chain.into_callback(forward(tx)))
            .await
            .unwrap();

        for _ in 0..2 {
            publisher
                .publish(
                    "calibration.steps",
                    Event::of(EventType::CalibrationStepStarted, Payload::new()),
                )
                .await
                .unwrap();
        }
        next_event(&mut rx).await;
        assert_quiet(&mut rx).await;

        let text = encode_metrics().unwrap();
        assert!(text.contains("bus_messages_published_total"));
        assert!(text.contains("metrics_publisher"));
        assert!(text.contains("calibration.step.started"));
        assert!(text.contains("bus_middleware_drops_total"));
        assert!(text.contains("rate_limited"));
    }

    #[test]
    fn test_telemetry_config_for_bus_service() {
        let config = TelemetryConfig::for_service("ai_service");
        assert_eq!(config.service_name, "ai_service");
    }
}
