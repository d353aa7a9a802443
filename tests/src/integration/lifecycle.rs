//! # Bus Lifecycle
//!
//! Connect, close, reconnect, broker loss, and transport-level subscription
//! bookkeeping seen from the broker side.

#[cfg(test)]
mod tests {
    use super::super::*;
    use event_bus::{BusError, EventManager, EventType, HealthStatus, Payload};

    #[tokio::test]
    async fn test_unsubscribe_releases_broker_interest() {
        let broker = InMemoryBroker::new();
        let bus = connected_bus(&broker, "ai_service").await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let first = bus.subscribe("ai.*", forward(tx.clone())).await.unwrap();
        let second = bus.subscribe("ai.*", forward(tx)).await.unwrap();
        assert_eq!(broker.interest_count("ai.*"), 1);

        assert_eq!(bus.unsubscribe("ai.*", Some(first)).await.unwrap(), 1);
        assert_eq!(broker.interest_count("ai.*"), 1);

        assert_eq!(bus.unsubscribe("ai.*", Some(second)).await.unwrap(), 1);
        assert_eq!(broker.interest_count("ai.*"), 0);
        assert_eq!(bus.unsubscribe("ai.*", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_stops_delivery_and_drops_connection() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "game_manager").await;
        let listener = connected_bus(&broker, "web_gateway").await;
        assert_eq!(broker.connection_count(), 2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.subscribe("game.*", forward(tx)).await.unwrap();
        listener.close().await.unwrap();
        listener.close().await.unwrap();

        assert!(!listener.is_connected());
        assert_eq!(broker.connection_count(), 1);
        assert_eq!(listener.stats().subscriptions_count, 0);

        let receivers = publisher
            .publish("game.g1", Event::of(EventType::GameStarted, Payload::new()))
            .await
            .unwrap();
        assert_eq!(receivers, 0);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_reconnect_after_close() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "game_manager").await;
        let listener = connected_bus(&broker, "web_gateway").await;

        listener.close().await.unwrap();
        listener.connect().await.unwrap();
        assert!(listener.is_connected());

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.subscribe("game.*", forward(tx)).await.unwrap();
        publisher
            .publish("game.g2", Event::of(EventType::GameCreated, Payload::new()))
            .await
            .unwrap();
        assert_eq!(next_event(&mut rx).await.event_type(), "game.created");
    }

    #[tokio::test]
    async fn test_broker_loss_reported_everywhere() {
        let broker = InMemoryBroker::new();
        let bus = connected_bus(&broker, "robot_service").await;
        let manager = EventManager::new(Arc::clone(&bus), "robot_service");
        assert!(bus.health_check().await.is_healthy());

        broker.shutdown();
        tokio::time::sleep(TEST_POLL * 5).await;

        assert!(!bus.is_connected());
        let report = bus.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.stats.is_none());

        let emitted = manager.notify_service_status("online").await;
        assert!(matches!(emitted, Err(BusError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_refused_when_broker_unavailable() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let bus = EventBus::in_memory(BusConfig::for_service("svc"), &broker);

        let result = bus.connect().await;
        assert!(matches!(result, Err(BusError::Connection(_))));
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn test_stats_track_traffic_across_services() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "game_manager").await;
        let listener = connected_bus(&broker, "web_gateway").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.subscribe("game.*", forward(tx)).await.unwrap();
        for _ in 0..3 {
            publisher
                .publish("game.g3", Event::of(EventType::GameFinished, Payload::new()))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            next_event(&mut rx).await;
        }

        assert_eq!(publisher.stats().messages_published, 3);
        let stats = listener.stats();
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.subscriptions.get("game.*"), Some(&1));
        assert_eq!(listener.subscription_info()[0].message_count, 3);
        assert_eq!(broker.messages_published(), 3);
    }
}
