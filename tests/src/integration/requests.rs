//! # Request/Response Between Services
//!
//! A requester emits on its default channel and waits on a private
//! `response.<id>` channel; a responder answers with `reply`.

#[cfg(test)]
mod tests {
    use super::super::*;
    use event_bus::catalog::channels;
    use event_bus::{payload, BusError, EventManager, Payload};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Responder answering every `ai.move.request` with a fixed move.
    async fn chess_engine(broker: &InMemoryBroker) -> Arc<EventManager> {
        let bus = connected_bus(broker, "ai_service").await;
        let manager = Arc::new(EventManager::new(Arc::clone(&bus), "ai_service"));
        let replier = Arc::clone(&manager);
        bus.subscribe(
            channels::SERVICE_EVENTS,
            callback_fn(move |event| {
                let replier = Arc::clone(&replier);
                async move {
                    if event.event_type() == "ai.move.request" {
                        let depth = event.payload().get("depth").cloned().unwrap_or(Value::Null);
                        replier
                            .reply(&event, payload(json!({"move": "g1f3", "depth": depth})))
                            .await?;
                    }
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();
        manager
    }

    #[tokio::test]
    async fn test_request_answered_across_buses() {
        let broker = InMemoryBroker::new();
        let _engine = chess_engine(&broker).await;
        let requester =
            EventManager::new(connected_bus(&broker, "game_manager").await, "game_manager");

        let response = requester
            .request_response(
                "ai.move.request",
                payload(json!({"depth": 12})),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert_eq!(response.get("move"), Some(&json!("g1f3")));
        assert_eq!(response.get("depth"), Some(&json!(12)));
        assert!(requester.bus().subscription_info().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_their_own_responses() {
        let broker = InMemoryBroker::new();
        let _engine = chess_engine(&broker).await;
        let requester = Arc::new(EventManager::new(
            connected_bus(&broker, "game_manager").await,
            "game_manager",
        ));

        let requests = (0..5).map(|depth| {
            let requester = Arc::clone(&requester);
            async move {
                requester
                    .request_response(
                        "ai.move.request",
                        payload(json!({"depth": depth})),
                        Duration::from_secs(2),
                    )
                    .await
                    .map(|response| (depth, response))
            }
        });

        for result in futures::future::join_all(requests).await {
            let (depth, response) = result.unwrap();
            assert_eq!(response.get("depth"), Some(&json!(depth)));
        }
        assert!(requester.bus().subscription_info().is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let broker = InMemoryBroker::new();
        let requester =
            EventManager::new(connected_bus(&broker, "game_manager").await, "game_manager");

        let result = requester
            .request_response("ai.analysis.request", Payload::new(), Duration::from_millis(100))
            .await;

        match result {
            Err(BusError::Timeout {
                request_type,
                timeout,
            }) => {
                assert_eq!(request_type, "ai.analysis.request");
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(requester.bus().subscription_info().is_empty());
    }

    #[tokio::test]
    async fn test_request_on_closed_bus_fails_fast() {
        let broker = InMemoryBroker::new();
        let bus = connected_bus(&broker, "game_manager").await;
        bus.close().await.unwrap();
        let requester = EventManager::new(bus, "game_manager");

        let result = requester.request("ai.move.request", Payload::new()).await;
        assert!(matches!(result, Err(BusError::NotConnected)));
    }

    #[tokio::test]
    async fn test_on_handler_sees_type_on_matching_channel() {
        let broker = InMemoryBroker::new();
        let listener = EventManager::new(connected_bus(&broker, "web_gateway").await, "web_gateway");
        let emitter = EventManager::new(connected_bus(&broker, "robot_service").await, "robot_service");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        listener
            .on(
                "robot.move.completed",
                callback_fn(move |_event| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        // The channel name must contain the type for `on` to see it.
        emitter
            .emit("robot.move.completed", Payload::new(), Some("robot.move.completed"))
            .await
            .unwrap();
        emitter
            .emit("robot.move.completed", Payload::new(), None)
            .await
            .unwrap();

        tokio::time::sleep(TEST_POLL * 10).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_service_status_broadcast() {
        let broker = InMemoryBroker::new();
        let monitor = connected_bus(&broker, "monitor").await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor
            .subscribe(channels::SERVICE_STATUS, forward(tx))
            .await
            .unwrap();

        for service in ["ai_service", "robot_service"] {
            let manager = EventManager::new(connected_bus(&broker, service).await, service);
            manager.notify_service_status("online").await.unwrap();
        }

        let mut services = vec![
            next_event(&mut rx).await.payload_str("service").map(str::to_string),
            next_event(&mut rx).await.payload_str("service").map(str::to_string),
        ];
        services.sort();
        assert_eq!(
            services,
            vec![Some("ai_service".to_string()), Some("robot_service".to_string())]
        );
    }
}
