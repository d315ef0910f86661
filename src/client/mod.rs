//! The `PubSub` client context.
//!
//! Holds the project, the broker handle and the name → path tables, and
//! exposes every operation as an [`Outcome`]. Errors never escape: each
//! public method funnels through [`capture`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::broker::rest::RestBroker;
use crate::config::{ENV_CREDENTIALS, PubsubConfig};
use crate::error::ValidationError;
use crate::outcome::{Outcome, capture};
use crate::types::validation::{
    ResourceName, validate_ack_deadline, validate_max_messages, validate_message_size,
    validate_project_id, validate_subscription_id, validate_topic_id,
};
use crate::types::{
    JsonMessage, Message, PublishedMessage, ReceivedMessage, SubscriptionInfo,
    SubscriptionOptions, TopicInfo,
};
use crate::{Error, Result};

static CREDENTIALS_WARNED: AtomicBool = AtomicBool::new(false);

/// Pub/Sub client context.
pub struct PubSub {
    project: String,
    broker: Arc<dyn Broker>,
    default_ack_deadline_seconds: u32,
    /// Topic name → topic path, filled by `create_topic`.
    topics: RwLock<HashMap<String, String>>,
    /// Subscription name → subscription path, filled by `create_subscription`.
    subscriptions: RwLock<HashMap<String, String>>,
}

impl PubSub {
    /// Create a client for `project` on top of any broker.
    pub fn new(project: impl Into<String>, broker: Arc<dyn Broker>) -> Result<Self> {
        let project = project.into();
        validate_project_id(&project)?;

        Ok(Self {
            project,
            broker,
            default_ack_deadline_seconds: 10,
            topics: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        })
    }

    /// Create a client talking to the REST API described by `config`.
    pub fn from_config(config: &PubsubConfig) -> Result<Self> {
        warn_if_unauthenticated(config);

        let broker = RestBroker::new(config.rest_broker_config())?;
        info!(
            project = %config.project_id,
            endpoint = %broker.endpoint(),
            "Pub/Sub client configured"
        );

        Self::new(config.project_id.clone(), Arc::new(broker))?
            .with_default_ack_deadline(config.default_ack_deadline_seconds)
    }

    /// Ack deadline used when `SubscriptionOptions` does not set one.
    pub fn with_default_ack_deadline(mut self, seconds: u32) -> Result<Self> {
        validate_ack_deadline(seconds)?;
        self.default_ack_deadline_seconds = seconds;
        Ok(self)
    }

    /// Project this client works in.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Underlying broker client.
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    /// Resolve a topic name to its path.
    ///
    /// Full paths pass through; names created through this client use the
    /// recorded path; anything else is formatted under this project.
    pub async fn topic_path(&self, name: &str) -> String {
        if name.starts_with("projects/") {
            return name.to_string();
        }
        if let Some(path) = self.topics.read().await.get(name) {
            return path.clone();
        }
        ResourceName::topic(&self.project, name)
    }

    /// Resolve a subscription name to its path.
    pub async fn subscription_path(&self, name: &str) -> String {
        if name.starts_with("projects/") {
            return name.to_string();
        }
        if let Some(path) = self.subscriptions.read().await.get(name) {
            return path.clone();
        }
        ResourceName::subscription(&self.project, name)
    }

    /// Create a topic and return its path. Creating an existing topic succeeds.
    pub async fn create_topic(&self, name: &str) -> Outcome<String> {
        capture("create_topic", self.create_topic_inner(name)).await
    }

    async fn create_topic_inner(&self, name: &str) -> Result<String> {
        validate_topic_id(name)?;
        let path = ResourceName::topic(&self.project, name);

        let path = match self.broker.create_topic(TopicInfo::new(path.clone())).await {
            Ok(topic) => topic.name,
            Err(Error::TopicAlreadyExists(_)) => {
                debug!(topic = %path, "Topic already exists");
                path
            }
            Err(e) => return Err(e),
        };

        self.topics
            .write()
            .await
            .insert(name.to_string(), path.clone());
        Ok(path)
    }

    /// Delete a topic and return its name.
    pub async fn delete_topic(&self, name: &str) -> Outcome<String> {
        capture("delete_topic", self.delete_topic_inner(name)).await
    }

    async fn delete_topic_inner(&self, name: &str) -> Result<String> {
        let path = self.topic_path(name).await;
        self.broker.delete_topic(&path).await?;
        self.topics.write().await.remove(name);
        Ok(name.to_string())
    }

    /// Whether a topic exists, by scanning the project's topic list.
    pub async fn topic_exists(&self, name: &str) -> Outcome<bool> {
        capture("topic_exists", self.topic_exists_inner(name)).await
    }

    async fn topic_exists_inner(&self, name: &str) -> Result<bool> {
        let path = self.topic_path(name).await;
        let topics = self.broker.list_topics(&self.project).await?;
        Ok(topics.iter().any(|t| t.name == path))
    }

    /// Create a subscription on an existing topic and return its path.
    ///
    /// An existing subscription is left untouched and reported as success.
    /// The topic is never created on the fly.
    pub async fn create_subscription(
        &self,
        topic: &str,
        name: &str,
        options: SubscriptionOptions,
    ) -> Outcome<String> {
        capture(
            "create_subscription",
            self.create_subscription_inner(topic, name, options),
        )
        .await
    }

    async fn create_subscription_inner(
        &self,
        topic: &str,
        name: &str,
        options: SubscriptionOptions,
    ) -> Result<String> {
        if topic.trim().is_empty() {
            return Err(
                ValidationError::InvalidTopicId("Topic name is required".to_string()).into(),
            );
        }
        validate_subscription_id(name)?;

        if self.subscription_exists_inner(name).await? {
            info!(subscription = %name, "Pub/Sub subscription already exists");
            let path = self.subscription_path(name).await;
            self.subscriptions
                .write()
                .await
                .insert(name.to_string(), path.clone());
            return Ok(path);
        }

        let ack_deadline_seconds = options
            .ack_deadline_seconds
            .unwrap_or(self.default_ack_deadline_seconds);
        validate_ack_deadline(ack_deadline_seconds)?;

        let request = SubscriptionInfo {
            name: ResourceName::subscription(&self.project, name),
            topic: self.topic_path(topic).await,
            ack_deadline_seconds,
            labels: options.labels,
            retain_acked_messages: options.retain_acked_messages,
            filter: options.filter,
        };

        let created = self.broker.create_subscription(request).await?;
        self.subscriptions
            .write()
            .await
            .insert(name.to_string(), created.name.clone());
        Ok(created.name)
    }

    /// Delete a subscription and return its name.
    pub async fn delete_subscription(&self, name: &str) -> Outcome<String> {
        capture("delete_subscription", self.delete_subscription_inner(name)).await
    }

    async fn delete_subscription_inner(&self, name: &str) -> Result<String> {
        let path = self.subscription_path(name).await;
        self.broker.delete_subscription(&path).await?;
        self.subscriptions.write().await.remove(name);
        Ok(name.to_string())
    }

    /// Whether a subscription exists, by scanning the project's subscription list.
    pub async fn subscription_exists(&self, name: &str) -> Outcome<bool> {
        capture("subscription_exists", self.subscription_exists_inner(name)).await
    }

    async fn subscription_exists_inner(&self, name: &str) -> Result<bool> {
        let path = self.subscription_path(name).await;
        let subscriptions = self.broker.list_subscriptions(&self.project).await?;
        Ok(subscriptions.iter().any(|s| s.name == path))
    }

    /// Publish one message and return its message ID.
    pub async fn publish(&self, topic: &str, message: impl Into<Message>) -> Outcome<String> {
        capture("publish", self.publish_inner(topic, message.into())).await
    }

    /// Publish the JSON encoding of `value` and return its message ID.
    pub async fn publish_json<T>(&self, topic: &str, value: &T) -> Outcome<String>
    where
        T: Serialize + ?Sized,
    {
        capture("publish_json", self.publish_json_inner(topic, value)).await
    }

    async fn publish_json_inner<T>(&self, topic: &str, value: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let message = Message::json(value)?;
        self.publish_inner(topic, message).await
    }

    async fn publish_inner(&self, topic: &str, message: Message) -> Result<String> {
        validate_message_size(&message.data)?;
        let path = self.topic_path(topic).await;

        let message_ids = self.broker.publish(&path, vec![message]).await?;
        message_ids
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal(format!("Broker returned no message id for {}", path)))
    }

    /// Publish every message concurrently and return how many were published.
    ///
    /// All publishes are attempted even if some fail. When any fails, the
    /// first failure in input order is returned instead of a count.
    pub async fn publish_many(&self, topic: &str, messages: Vec<Message>) -> Outcome<usize> {
        if messages.is_empty() {
            return Outcome::Success(0);
        }

        let count = messages.len();
        debug!(topic = %topic, count, "Publishing batch");

        let outcomes = join_all(messages.into_iter().map(|m| self.publish(topic, m))).await;

        match outcomes.into_iter().find(|o| o.is_failure()) {
            Some(Outcome::Failure(reason)) => Outcome::Failure(reason),
            _ => Outcome::Success(count),
        }
    }

    /// JSON-encode every message's data, then [`publish_many`](Self::publish_many).
    ///
    /// Nothing is published if any value fails to serialize.
    pub async fn publish_many_json<T>(
        &self,
        topic: &str,
        messages: &[JsonMessage<T>],
    ) -> Outcome<usize>
    where
        T: Serialize,
    {
        let encoded = capture("publish_many_json", async move { encode_all(messages) }).await;

        match encoded {
            Outcome::Success(encoded) => self.publish_many(topic, encoded).await,
            Outcome::Failure(reason) => Outcome::Failure(reason),
        }
    }

    /// Pull up to `max_messages` envelopes from a subscription.
    pub async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
        return_immediately: bool,
    ) -> Outcome<Vec<ReceivedMessage>> {
        capture(
            "pull",
            self.pull_inner(subscription, max_messages, return_immediately),
        )
        .await
    }

    async fn pull_inner(
        &self,
        subscription: &str,
        max_messages: u32,
        return_immediately: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        validate_max_messages(max_messages)?;

        let path = self.subscription_path(subscription).await;
        let received = self
            .broker
            .pull(&path, max_messages, return_immediately)
            .await?;
        debug!(subscription = %path, count = received.len(), "Pulled messages");
        Ok(received)
    }

    /// Acknowledge deliveries and return how many ack ids were sent.
    pub async fn acknowledge<I, S>(&self, subscription: &str, ack_ids: I) -> Outcome<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ack_ids: Vec<String> = ack_ids.into_iter().map(Into::into).collect();
        capture("acknowledge", self.acknowledge_inner(subscription, ack_ids)).await
    }

    async fn acknowledge_inner(&self, subscription: &str, ack_ids: Vec<String>) -> Result<usize> {
        if ack_ids.is_empty() {
            return Err(ValidationError::InvalidParameter {
                name: "ack_ids".to_string(),
                reason: "At least one ack id is required".to_string(),
            }
            .into());
        }

        let path = self.subscription_path(subscription).await;
        self.broker.acknowledge(&path, &ack_ids).await?;
        Ok(ack_ids.len())
    }
}

fn encode_all<T: Serialize>(messages: &[JsonMessage<T>]) -> Result<Vec<Message>> {
    messages.iter().map(JsonMessage::encode).collect()
}

/// Decode a delivered message's data as JSON.
pub fn jsonify_message_data<T: DeserializeOwned>(message: &PublishedMessage) -> Outcome<T> {
    message.json().into()
}

/// Warn once per process when requests will go out without credentials.
fn warn_if_unauthenticated(config: &PubsubConfig) {
    if config.uses_emulator() || config.access_token.is_some() {
        return;
    }
    if std::env::var_os(ENV_CREDENTIALS).is_some() {
        return;
    }
    if !CREDENTIALS_WARNED.swap(true, Ordering::SeqCst) {
        warn!(
            "{} is not set and no access token is configured; requests to {} will be unauthenticated",
            ENV_CREDENTIALS,
            config.resolved_endpoint()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::InMemoryBroker;

    fn client() -> PubSub {
        PubSub::new("test-project", Arc::new(InMemoryBroker::new())).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_project() {
        assert!(PubSub::new("", Arc::new(InMemoryBroker::new())).is_err());
    }

    #[test]
    fn test_default_ack_deadline_is_validated() {
        assert!(client().with_default_ack_deadline(5).is_err());
        assert!(client().with_default_ack_deadline(60).is_ok());
    }

    #[tokio::test]
    async fn test_path_resolution() {
        let pubsub = client();
        assert_eq!(
            pubsub.topic_path("orders").await,
            "projects/test-project/topics/orders"
        );
        assert_eq!(
            pubsub.subscription_path("projects/other/subscriptions/s1").await,
            "projects/other/subscriptions/s1"
        );
    }

    #[tokio::test]
    async fn test_create_topic_records_path() {
        let pubsub = client();
        let path = pubsub.create_topic("orders").await;
        assert_eq!(
            path.payload().map(String::as_str),
            Some("projects/test-project/topics/orders")
        );
        assert!(pubsub.topics.read().await.contains_key("orders"));

        pubsub.delete_topic("orders").await;
        assert!(!pubsub.topics.read().await.contains_key("orders"));
    }

    #[test]
    fn test_jsonify_message_data() {
        let published = PublishedMessage::from_message(Message::new(r#"{"isOne":true}"#));
        let value: Outcome<serde_json::Value> = jsonify_message_data(&published);
        assert_eq!(value, Outcome::Success(serde_json::json!({"isOne": true})));

        let published = PublishedMessage::from_message(Message::new("not json"));
        assert!(jsonify_message_data::<serde_json::Value>(&published).is_failure());
    }
}
