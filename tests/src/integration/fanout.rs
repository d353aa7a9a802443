//! # Multi-Service Fan-Out
//!
//! Several services share one broker. Each publish reaches every connection
//! with a matching subscription exactly once, and every matching callback on
//! that connection runs.

#[cfg(test)]
mod tests {
    use super::super::*;
    use event_bus::catalog::channels;
    use event_bus::{payload, EventType, Payload};
    use serde_json::json;

    #[tokio::test]
    async fn test_game_event_reaches_every_interested_service() {
        let broker = InMemoryBroker::new();
        let game = connected_bus(&broker, "game_manager").await;
        let ai = connected_bus(&broker, "ai_service").await;
        let web = connected_bus(&broker, "web_gateway").await;

        let (ai_tx, mut ai_rx) = mpsc::unbounded_channel();
        let (web_tx, mut web_rx) = mpsc::unbounded_channel();
        ai.subscribe("game.*.moves", forward(ai_tx)).await.unwrap();
        web.subscribe(channels::GAME_EVENTS, forward(web_tx)).await.unwrap();

        let receivers = game
            .publish(
                "game.g1.moves",
                Event::of(EventType::MoveExecuted, payload(json!({"move": "e2e4"})))
                    .with_source("game_manager"),
            )
            .await
            .unwrap();
        assert_eq!(receivers, 2);

        for rx in [&mut ai_rx, &mut web_rx] {
            let event = next_event(rx).await;
            assert_eq!(event.event_type(), "game.move.executed");
            assert_eq!(event.source(), "game_manager");
            assert_eq!(event.payload_str("move"), Some("e2e4"));
            assert!(event.event_id().is_some());
            assert!(event.published_at().is_some());
        }
    }

    #[tokio::test]
    async fn test_overlapping_patterns_on_one_bus_deliver_once_each() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "robot_service").await;
        let listener = connected_bus(&broker, "monitor").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.subscribe("robot.*", forward(tx.clone())).await.unwrap();
        listener.subscribe("robot.status", forward(tx)).await.unwrap();

        publisher
            .publish(
                "robot.status",
                Event::of(EventType::RobotStatusChanged, Payload::new()),
            )
            .await
            .unwrap();

        // One callback per matching subscription, and no duplicate frames.
        next_event(&mut rx).await;
        next_event(&mut rx).await;
        assert_quiet(&mut rx).await;
        assert_eq!(listener.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_non_matching_channel_is_not_delivered() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "vision_service").await;
        let listener = connected_bus(&broker, "ai_service").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.subscribe("ai.*", forward(tx)).await.unwrap();

        let receivers = publisher
            .publish(
                channels::VISION_DETECTION,
                Event::of(EventType::VisionBoardDetected, Payload::new()),
            )
            .await
            .unwrap();
        assert_eq!(receivers, 0);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_order_preserved_per_channel() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "game_manager").await;
        let listener = connected_bus(&broker, "web_gateway").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        listener.subscribe("game.g7.moves", forward(tx)).await.unwrap();

        for ply in 0..20 {
            publisher
                .publish(
                    "game.g7.moves",
                    Event::of(EventType::MoveExecuted, payload(json!({"ply": ply}))),
                )
                .await
                .unwrap();
        }

        for ply in 0..20 {
            let event = next_event(&mut rx).await;
            assert_eq!(event.payload().get("ply"), Some(&json!(ply)));
        }
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_peers() {
        let broker = InMemoryBroker::new();
        let publisher = connected_bus(&broker, "system").await;
        let listener = connected_bus(&broker, "ops").await;

        listener
            .subscribe(
                channels::SYSTEM_ALERTS,
                callback_fn(|_event| async { Err(anyhow::anyhow!("pager offline")) }),
            )
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        listener
            .subscribe(channels::SYSTEM_ALERTS, forward(tx))
            .await
            .unwrap();

        publisher
            .publish(
                channels::SYSTEM_ALERTS,
                Event::of(EventType::AlertTriggered, Payload::new()),
            )
            .await
            .unwrap();

        next_event(&mut rx).await;
        assert_eq!(listener.stats().errors_count, 1);
        assert!(listener.is_connected());
    }
}
