//! # Middleware On A Live Bus
//!
//! Chains bound with `into_callback` and subscribed like any other callback.

#[cfg(test)]
mod tests {
    use super::super::*;
    use event_bus::middleware::{
        FilterMiddleware, MetricsMiddleware, PriorityQueueMiddleware, RateLimitConfig,
        RateLimitMiddleware, RetryConfig, RetryMiddleware, StandardChainConfig,
    };
    use event_bus::{EventPriority, EventType, MiddlewareChain, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_standard_chain_counts_and_limits() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "web_gateway").await;
        let listener = connected_bus(&broker, "game_manager").await;

        let metrics = Arc::new(MetricsMiddleware::new());
        let limiter = Arc::new(RateLimitMiddleware::new(RateLimitConfig::per_source(
            3,
            Duration::from_secs(60),
        )));
        let chain = MiddlewareChain::new()
            .with_shared(metrics.clone())
            .with_shared(limiter.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener
            .subscribe("web.clients.*", chain.into_callback(forward(tx)))
            .await
            .unwrap();

        for _ in 0..5 {
            publisher
                .publish(
                    "web.clients.c1",
                    Event::of(EventType::WebMessageReceived, Payload::new())
                        .with_source("client_c1"),
                )
                .await
                .unwrap();
        }

        for _ in 0..3 {
            next_event(&mut rx).await;
        }
        assert_quiet(&mut rx).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_events, 5);
        assert_eq!(snapshot.events_by_source.get("client_c1"), Some(&5));
        assert_eq!(limiter.dropped(), 2);
        // Drops are not callback errors.
        assert_eq!(listener.stats().errors_count, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_before_metrics_hides_drops() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "web_gateway").await;
        let listener = connected_bus(&broker, "game_manager").await;

        let metrics = Arc::new(MetricsMiddleware::new());
        let limiter = Arc::new(RateLimitMiddleware::new(RateLimitConfig::per_source(
            3,
            Duration::from_secs(60),
        )));
        let chain = MiddlewareChain::new()
            .with_shared(limiter.clone())
            .with_shared(metrics.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener
            .subscribe("web.clients.*", chain.into_callback(forward(tx)))
            .await
            .unwrap();

        for _ in 0..5 {
            publisher
                .publish(
                    "web.clients.c2",
                    Event::of(EventType::WebMessageReceived, Payload::new())
                        .with_source("client_c2"),
                )
                .await
                .unwrap();
        }

        for _ in 0..3 {
            next_event(&mut rx).await;
        }
        assert_quiet(&mut rx).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.events_by_source.get("client_c2"), Some(&3));
        assert_eq!(limiter.dropped(), 2);
    }

    #[tokio::test]
    async fn test_standard_chain_layout() {
        let chain = MiddlewareChain::standard(&StandardChainConfig {
            rate_limit: Some(RateLimitConfig::global(100, Duration::from_secs(1))),
            ..StandardChainConfig::default()
        });
        assert_eq!(chain.names(), vec!["logging", "metrics", "rate_limit"]);
    }

    #[tokio::test]
    async fn test_priority_filter_on_subscription() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "robot_service").await;
        let listener = connected_bus(&broker, "ops").await;

        let chain =
            MiddlewareChain::new().with(FilterMiddleware::by_min_priority(EventPriority::Critical));
        let (tx, mut rx) = mpsc::unbounded_channel();
        listener
            .subscribe("robot.*", chain.into_callback(forward(tx)))
            .await
            .unwrap();

        for event_type in [
            EventType::RobotMoveStarted,
            EventType::RobotError,
            EventType::RobotStatusChanged,
        ] {
            publisher
                .publish("robot.status", Event::of(event_type, Payload::new()))
                .await
                .unwrap();
        }

        assert_eq!(next_event(&mut rx).await.event_type(), "robot.error");
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_retry_recovers_flaky_handler() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "ai_service").await;
        let listener = connected_bus(&broker, "game_manager").await;

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let flaky = callback_fn(move |event| {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("engine warming up");
                }
                let _ = tx.send(event);
                Ok(())
            }
        });
        let chain = MiddlewareChain::new().with(RetryMiddleware::new(RetryConfig::new(
            3,
            Duration::from_millis(5),
        )));
        listener
            .subscribe("ai.responses", chain.into_callback(flaky))
            .await
            .unwrap();

        publisher
            .publish(
                "ai.responses",
                Event::of(EventType::AiMoveResult, Payload::new()),
            )
            .await
            .unwrap();

        next_event(&mut rx).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(listener.stats().errors_count, 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_surfaces_as_callback_error() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "ai_service").await;
        let listener = connected_bus(&broker, "game_manager").await;

        let chain = MiddlewareChain::new().with(RetryMiddleware::new(RetryConfig::new(
            1,
            Duration::from_millis(5),
        )));
        listener
            .subscribe(
                "ai.responses",
                chain.into_callback(callback_fn(|_event| async {
                    Err(anyhow::anyhow!("engine offline"))
                })),
            )
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.subscribe("ai.responses", forward(tx)).await.unwrap();

        publisher
            .publish(
                "ai.responses",
                Event::of(EventType::AiEngineError, Payload::new()),
            )
            .await
            .unwrap();

        next_event(&mut rx).await;
        assert_eq!(listener.stats().errors_count, 1);
    }

    #[tokio::test]
    async fn test_priority_queue_defers_delivery() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "vision_service").await;
        let listener = connected_bus(&broker, "game_manager").await;

        let queue = Arc::new(PriorityQueueMiddleware::default());
        let chain = MiddlewareChain::new().with_shared(queue.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        listener
            .subscribe("vision.*", chain.into_callback(forward(tx)))
            .await
            .unwrap();

        publisher
            .publish(
                "vision.detection",
                Event::of(EventType::VisionPieceDetected, Payload::new()),
            )
            .await
            .unwrap();
        publisher
            .publish(
                "vision.detection",
                Event::of(EventType::VisionError, Payload::new()),
            )
            .await
            .unwrap();

        // Nothing runs until the drain starts.
        tokio::time::sleep(TEST_POLL * 5).await;
        assert_eq!(queue.pending(), 2);
        assert!(rx.try_recv().is_err());

        queue.start();
        assert_eq!(next_event(&mut rx).await.event_type(), "vision.error");
        assert_eq!(
            next_event(&mut rx).await.event_type(),
            "vision.piece.detected"
        );
        queue.stop().await;
    }
}
