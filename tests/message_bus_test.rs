//! Message bus traffic patterns between agents.

use std::sync::Arc;
use std::time::Duration;

use faultline::domain::models::{Message, MessageBusConfig, MessagePayload, Recipient};
use faultline::services::{MessageBus, Received};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn bus(capacity: usize) -> Arc<MessageBus> {
    Arc::new(MessageBus::new(MessageBusConfig {
        mailbox_capacity: capacity,
        receive_timeout_ms: 200,
    }))
}

#[tokio::test]
async fn test_collaboration_round_trip() {
    let bus = bus(16);
    let (asker, helper, bystander) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    for id in [asker, helper, bystander] {
        assert!(bus.register_agent(id).await);
    }

    let request = Message::collaboration_request(
        asker,
        Recipient::Agent(helper),
        "fracture-surface",
        serde_json::json!({"sample": "S-17"}),
    );
    assert!(bus.send(request).await);

    let Received::Message(received) = bus.receive(helper).await else {
        panic!("helper should receive the request");
    };
    let MessagePayload::CollaborationRequest { request_id, topic, .. } = received.payload else {
        panic!("unexpected payload");
    };
    assert_eq!(topic, "fracture-surface");

    let response = Message::collaboration_response(
        helper,
        received.from,
        request_id,
        true,
        serde_json::json!({"striations": 42}),
    );
    assert!(bus.send(response).await);

    match bus.receive(asker).await.into_message().map(|m| m.payload) {
        Some(MessagePayload::CollaborationResponse {
            request_id: answered,
            accepted,
            body,
        }) => {
            assert_eq!(answered, request_id);
            assert!(accepted);
            assert_eq!(body["striations"], 42);
        }
        other => panic!("unexpected reply {other:?}"),
    }
    assert_eq!(bus.queue_size(bystander).await, 0);
}

#[tokio::test]
async fn test_broadcast_request_reaches_every_peer() {
    let bus = bus(16);
    let sender = Uuid::new_v4();
    let peers: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    bus.register_agent(sender).await;
    for peer in &peers {
        bus.register_agent(*peer).await;
    }

    let request = Message::collaboration_request(sender, Recipient::Broadcast, "calibration", serde_json::Value::Null);
    assert!(bus.send(request).await);

    for peer in &peers {
        let message = bus.receive_non_blocking(*peer).await.expect("peer got the broadcast");
        assert_eq!(message.from, sender);
        assert_eq!(message.to, Recipient::Broadcast);
    }
    assert_eq!(bus.queue_size(sender).await, 0);
    assert_eq!(bus.stats().await.broadcasts, 1);
}

#[tokio::test]
async fn test_concurrent_senders_keep_per_sender_order() {
    let bus = bus(1024);
    let inbox = Uuid::new_v4();
    bus.register_agent(inbox).await;

    let senders: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let handles: Vec<_> = senders
        .iter()
        .map(|&from| {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move {
                for seq in 0..50 {
                    let message = Message::collaboration_request(
                        from,
                        Recipient::Agent(inbox),
                        "seq",
                        serde_json::json!(seq),
                    );
                    assert!(bus.send(message).await);
                }
            })
        })
        .collect();
    futures::future::join_all(handles).await;

    let mut last_seen = std::collections::HashMap::new();
    let mut total = 0;
    while let Some(message) = bus.receive_non_blocking(inbox).await {
        let MessagePayload::CollaborationRequest { body, .. } = message.payload else {
            panic!("unexpected payload");
        };
        let seq = body.as_i64().unwrap();
        if let Some(previous) = last_seen.insert(message.from, seq) {
            assert!(seq > previous, "messages from one sender arrive in order");
        }
        total += 1;
    }
    assert_eq!(total, 400);
    assert_eq!(bus.stats().await.delivered, 400);
}

#[tokio::test]
async fn test_backpressure_recovers_after_drain() {
    let bus = bus(2);
    let agent = Uuid::new_v4();
    bus.register_agent(agent).await;

    let to_agent = |n: i64| {
        Message::collaboration_request(Uuid::new_v4(), Recipient::Agent(agent), "n", serde_json::json!(n))
    };
    assert!(bus.send(to_agent(1)).await);
    assert!(bus.send(to_agent(2)).await);
    assert!(!bus.send(to_agent(3)).await);

    assert!(bus.receive_non_blocking(agent).await.is_some());
    assert!(bus.send(to_agent(4)).await);
    assert_eq!(bus.clear_queue(agent).await, 2);
    assert_eq!(bus.queue_size(agent).await, 0);
}

#[tokio::test]
async fn test_disconnected_agent_gets_nothing_until_reconnected() {
    let bus = bus(4);
    let agent = Uuid::new_v4();
    bus.register_agent(agent).await;
    assert!(bus.set_connected(agent, false).await);
    assert!(bus.online_agents().await.is_empty());

    let note = || Message::collaboration_request(Uuid::new_v4(), Recipient::Agent(agent), "n", serde_json::Value::Null);
    assert!(!bus.send(note()).await);

    bus.set_connected(agent, true).await;
    assert!(bus.send(note()).await);
    assert_eq!(bus.online_agents().await, vec![agent]);
}

#[tokio::test]
async fn test_blocked_receiver_wakes_on_shutdown() {
    let bus = bus(4);
    let agent = Uuid::new_v4();
    bus.register_agent(agent).await;

    let waiter = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            bus.receive_with(agent, Duration::from_secs(30), &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.shutdown().await;

    let received = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("receiver should wake")
        .unwrap();
    assert!(matches!(received, Received::Disconnected));
    assert!(!bus.register_agent(Uuid::new_v4()).await);
}
