//! Integration tests for the `PubSub` client over the in-memory broker.

use async_trait::async_trait;
use pubwrap::broker::Broker;
use pubwrap::broker::memory::InMemoryBroker;
use pubwrap::types::{SubscriptionInfo, TopicInfo};
use pubwrap::{
    Error, JsonMessage, Message, Outcome, PubSub, ReceivedMessage, Result, SubscriptionOptions,
    jsonify_message_data,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const PROJECT: &str = "test-project";

/// Helper to create a client over a fresh in-memory broker
fn client() -> (PubSub, InMemoryBroker) {
    let broker = InMemoryBroker::new();
    let pubsub = PubSub::new(PROJECT, Arc::new(broker.clone())).expect("Failed to create client");
    (pubsub, broker)
}

/// Helper to create a topic with one subscription attached
async fn topic_with_subscription(pubsub: &PubSub, topic: &str, subscription: &str) {
    assert!(pubsub.create_topic(topic).await.is_success());
    let created = pubsub
        .create_subscription(topic, subscription, SubscriptionOptions::default())
        .await;
    assert!(created.is_success(), "create_subscription: {:?}", created);
}

/// Broker that refuses to publish messages whose data is `boom`.
struct FlakyBroker {
    inner: InMemoryBroker,
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn create_topic(&self, topic: TopicInfo) -> Result<TopicInfo> {
        self.inner.create_topic(topic).await
    }

    async fn get_topic(&self, name: &str) -> Result<TopicInfo> {
        self.inner.get_topic(name).await
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.inner.delete_topic(name).await
    }

    async fn list_topics(&self, project: &str) -> Result<Vec<TopicInfo>> {
        self.inner.list_topics(project).await
    }

    async fn create_subscription(
        &self,
        subscription: SubscriptionInfo,
    ) -> Result<SubscriptionInfo> {
        self.inner.create_subscription(subscription).await
    }

    async fn get_subscription(&self, name: &str) -> Result<SubscriptionInfo> {
        self.inner.get_subscription(name).await
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        self.inner.delete_subscription(name).await
    }

    async fn list_subscriptions(&self, project: &str) -> Result<Vec<SubscriptionInfo>> {
        self.inner.list_subscriptions(project).await
    }

    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<Vec<String>> {
        if messages.iter().any(|m| m.data == b"boom") {
            return Err(Error::Api {
                status: 500,
                message: "publish rejected".to_string(),
            });
        }
        self.inner.publish(topic, messages).await
    }

    async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
        return_immediately: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        self.inner
            .pull(subscription, max_messages, return_immediately)
            .await
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        self.inner.acknowledge(subscription, ack_ids).await
    }
}

#[tokio::test]
async fn test_publish_to_missing_topic_fails() {
    let (pubsub, _) = client();

    let outcome = pubsub.publish("does-not-exist", "hello").await;

    assert!(outcome.is_failure());
    assert!(outcome.reason().unwrap().contains("Topic not found"));
}

#[tokio::test]
async fn test_topic_exists_lifecycle() {
    let (pubsub, _) = client();

    assert_eq!(pubsub.topic_exists("events").await, Outcome::Success(false));

    let created = pubsub.create_topic("events").await;
    assert_eq!(
        created,
        Outcome::Success("projects/test-project/topics/events".to_string())
    );
    assert_eq!(pubsub.topic_exists("events").await, Outcome::Success(true));

    assert_eq!(
        pubsub.delete_topic("events").await,
        Outcome::Success("events".to_string())
    );
    assert_eq!(pubsub.topic_exists("events").await, Outcome::Success(false));
}

#[tokio::test]
async fn test_create_topic_twice_succeeds() {
    let (pubsub, broker) = client();

    assert!(pubsub.create_topic("events").await.is_success());
    assert!(pubsub.create_topic("events").await.is_success());

    assert_eq!(broker.list_topics(PROJECT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_missing_topic_fails() {
    let (pubsub, _) = client();
    assert!(pubsub.delete_topic("ghost").await.is_failure());
}

#[tokio::test]
async fn test_invalid_topic_name_fails() {
    let (pubsub, _) = client();
    let outcome = pubsub.create_topic("goog-reserved").await;
    assert!(outcome.is_failure());
}

#[tokio::test]
async fn test_publish_many_then_pull() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let outcome = pubsub
        .publish_many("orders", vec![Message::new("A"), Message::new("B")])
        .await;
    assert_eq!(outcome, Outcome::Success(2));

    let received = pubsub
        .pull("orders-sub", 2, true)
        .await
        .into_payload()
        .expect("pull failed");
    assert_eq!(received.len(), 2);

    let mut bodies: Vec<String> = received.iter().map(|r| r.message.text()).collect();
    bodies.sort();
    assert_eq!(bodies, vec!["A", "B"]);
}

#[tokio::test]
async fn test_publish_many_empty_is_zero() {
    let (pubsub, _) = client();
    // The topic does not even need to exist.
    assert_eq!(
        pubsub.publish_many("nowhere", Vec::new()).await,
        Outcome::Success(0)
    );
}

#[tokio::test]
async fn test_publish_many_reports_first_failure() {
    let broker = FlakyBroker {
        inner: InMemoryBroker::new(),
    };
    let pubsub = PubSub::new(PROJECT, Arc::new(broker)).unwrap();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let outcome = pubsub
        .publish_many("orders", vec![Message::new("fine"), Message::new("boom")])
        .await;

    assert!(outcome.is_failure());
    assert_eq!(
        outcome.reason(),
        Some("API error (500): publish rejected")
    );

    // The good message was still attempted.
    let received = pubsub.pull("orders-sub", 10, true).await.into_payload().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message.text(), "fine");
}

#[tokio::test]
async fn test_publish_many_failure_follows_input_order() {
    let broker = FlakyBroker {
        inner: InMemoryBroker::new(),
    };
    let pubsub = PubSub::new(PROJECT, Arc::new(broker)).unwrap();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let oversized = || Message::new(vec![0u8; 10 * 1024 * 1024 + 1]);

    let outcome = pubsub
        .publish_many(
            "orders",
            vec![Message::new("ok"), oversized(), Message::new("boom")],
        )
        .await;
    let reason = outcome.reason().expect("batch should fail");
    assert!(reason.starts_with("Validation error: Message too large"), "{}", reason);

    let outcome = pubsub
        .publish_many(
            "orders",
            vec![Message::new("ok"), Message::new("boom"), oversized()],
        )
        .await;
    assert_eq!(outcome.reason(), Some("API error (500): publish rejected"));

    // Only the two "ok" messages made it through.
    let received = pubsub.pull("orders-sub", 10, true).await.into_payload().unwrap();
    assert_eq!(received.len(), 2);
    assert!(received.iter().all(|r| r.message.text() == "ok"));
}

#[tokio::test]
async fn test_publish_many_oversized_message_fails() {
    let (pubsub, _) = client();
    assert!(pubsub.create_topic("orders").await.is_success());

    let too_big = Message::new(vec![0u8; 10 * 1024 * 1024 + 1]);
    let outcome = pubsub
        .publish_many("orders", vec![Message::new("ok"), too_big])
        .await;

    assert!(outcome.reason().unwrap().contains("Message too large"));
}

#[tokio::test]
async fn test_ack_removes_message() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    assert!(pubsub.publish("orders", "only one").await.is_success());

    let received = pubsub.pull("orders-sub", 1, true).await.into_payload().unwrap();
    assert_eq!(received.len(), 1);

    let acked = pubsub
        .acknowledge("orders-sub", received.iter().map(|r| r.ack_id.clone()))
        .await;
    assert_eq!(acked, Outcome::Success(1));

    let again = pubsub.pull("orders-sub", 1, true).await.into_payload().unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_acknowledge_requires_ids() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let outcome = pubsub.acknowledge("orders-sub", Vec::<String>::new()).await;
    assert!(outcome.is_failure());
}

#[tokio::test]
async fn test_acknowledge_garbage_id_fails() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let outcome = pubsub.acknowledge("orders-sub", ["not-an-ack-id"]).await;
    assert!(outcome.reason().unwrap().contains("Invalid ack id"));
}

#[tokio::test(start_paused = true)]
async fn test_unacked_message_is_redelivered() {
    let (pubsub, _) = client();
    assert!(pubsub.create_topic("orders").await.is_success());
    assert!(
        pubsub
            .create_subscription(
                "orders",
                "orders-sub",
                SubscriptionOptions::default().with_ack_deadline(10),
            )
            .await
            .is_success()
    );
    assert!(pubsub.publish("orders", "retry me").await.is_success());

    let first = pubsub.pull("orders-sub", 1, true).await.into_payload().unwrap();
    assert_eq!(first[0].delivery_attempt, 1);

    // Still in flight before the deadline.
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(pubsub.pull("orders-sub", 1, true).await.into_payload().unwrap().is_empty());

    tokio::time::advance(Duration::from_secs(6)).await;
    let second = pubsub.pull("orders-sub", 1, true).await.into_payload().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].delivery_attempt, 2);
    assert_eq!(second[0].message.message_id, first[0].message.message_id);
    assert_ne!(second[0].ack_id, first[0].ack_id);

    // The stale ack id is ignored; the fresh one removes the message.
    assert!(pubsub.acknowledge("orders-sub", [first[0].ack_id.clone()]).await.is_success());
    assert!(pubsub.acknowledge("orders-sub", [second[0].ack_id.clone()]).await.is_success());

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(pubsub.pull("orders-sub", 1, true).await.into_payload().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_waiting_pull_returns_on_publish() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;
    let pubsub = Arc::new(pubsub);

    let puller = {
        let pubsub = Arc::clone(&pubsub);
        tokio::spawn(async move { pubsub.pull("orders-sub", 5, false).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pubsub.publish("orders", "late").await.is_success());

    let received = puller.await.unwrap().into_payload().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message.text(), "late");
}

#[tokio::test]
async fn test_create_subscription_requires_topic() {
    let (pubsub, _) = client();

    let outcome = pubsub
        .create_subscription("missing", "orphan", SubscriptionOptions::default())
        .await;
    assert!(outcome.reason().unwrap().contains("Topic not found"));

    // The topic was not created on the fly.
    assert_eq!(pubsub.topic_exists("missing").await, Outcome::Success(false));

    let outcome = pubsub
        .create_subscription("", "orphan", SubscriptionOptions::default())
        .await;
    assert!(outcome.is_failure());
}

#[tokio::test]
async fn test_create_existing_subscription_succeeds() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let again = pubsub
        .create_subscription("orders", "orders-sub", SubscriptionOptions::default())
        .await;
    assert_eq!(
        again,
        Outcome::Success("projects/test-project/subscriptions/orders-sub".to_string())
    );
    assert_eq!(
        pubsub.subscription_exists("orders-sub").await,
        Outcome::Success(true)
    );
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let (pubsub, broker) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let info = broker
        .get_subscription("projects/test-project/subscriptions/orders-sub")
        .await
        .unwrap();
    assert_eq!(info.topic, "projects/test-project/topics/orders");
    assert_eq!(info.ack_deadline_seconds, 10);

    assert_eq!(
        pubsub.delete_subscription("orders-sub").await,
        Outcome::Success("orders-sub".to_string())
    );
    assert_eq!(
        pubsub.subscription_exists("orders-sub").await,
        Outcome::Success(false)
    );
    assert!(pubsub.delete_subscription("orders-sub").await.is_failure());
}

#[tokio::test]
async fn test_subscription_survives_topic_deletion() {
    let (pubsub, broker) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    assert!(pubsub.delete_topic("orders").await.is_success());

    assert_eq!(
        pubsub.subscription_exists("orders-sub").await,
        Outcome::Success(true)
    );
    let info = broker
        .get_subscription("projects/test-project/subscriptions/orders-sub")
        .await
        .unwrap();
    assert_eq!(info.topic, "_deleted-topic_");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ride {
    bike: String,
    is_one: bool,
}

#[tokio::test]
async fn test_publish_many_json_round_trip() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "rides", "rides-sub").await;

    let rides = vec![
        JsonMessage::new(Ride {
            bike: "fixie".to_string(),
            is_one: true,
        })
        .with_attribute("bikes", "cool"),
        JsonMessage::new(Ride {
            bike: "tandem".to_string(),
            is_one: false,
        })
        .with_attribute("today", "friday"),
    ];

    assert_eq!(
        pubsub.publish_many_json("rides", &rides).await,
        Outcome::Success(2)
    );

    let received = pubsub.pull("rides-sub", 2, true).await.into_payload().unwrap();
    assert_eq!(received.len(), 2);

    for envelope in &received {
        let ride: Ride = jsonify_message_data(&envelope.message)
            .into_payload()
            .expect("message data is JSON");
        let expected = rides.iter().find(|r| r.data == ride).expect("known ride");
        assert_eq!(envelope.message.attributes, expected.attributes);
    }
}

#[tokio::test]
async fn test_publish_json_and_jsonify() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "rides", "rides-sub").await;

    let outcome = pubsub
        .publish_json("rides", &serde_json::json!({ "isOne": true }))
        .await;
    assert!(outcome.is_success());

    let received = pubsub.pull("rides-sub", 1, true).await.into_payload().unwrap();
    assert_eq!(received[0].message.data, br#"{"isOne":true}"#);

    let text: Outcome<Ride> = jsonify_message_data(&received[0].message);
    assert!(text.is_failure());
}

#[tokio::test]
async fn test_full_paths_are_accepted() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    let published = pubsub
        .publish("projects/test-project/topics/orders", "by path")
        .await;
    assert!(published.is_success());

    let received = pubsub
        .pull("projects/test-project/subscriptions/orders-sub", 1, true)
        .await
        .into_payload()
        .unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn test_pull_rejects_zero_max_messages() {
    let (pubsub, _) = client();
    topic_with_subscription(&pubsub, "orders", "orders-sub").await;

    assert!(pubsub.pull("orders-sub", 0, true).await.is_failure());
}
