//! In-memory broker implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::broker::Broker;
use crate::core::ack::{generate_ack_id, parse_ack_id};
use crate::error::ValidationError;
use crate::types::validation::{
    DELETED_TOPIC, ResourceName, validate_ack_deadline, validate_attributes, validate_max_messages,
    validate_message_size,
};
use crate::types::{Message, PublishedMessage, ReceivedMessage, SubscriptionInfo, TopicInfo};
use crate::{Error, Result};

/// Configuration for the in-memory broker.
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Largest batch handed out by one pull.
    pub max_pull_batch: usize,
    /// How long a pull without `return_immediately` waits for messages.
    pub pull_wait: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_pull_batch: 1000,
            pull_wait: Duration::from_secs(5),
        }
    }
}

/// In-memory broker.
///
/// Topics fan out to every attached subscription; each subscription keeps
/// its own queue and its own in-flight table keyed by ack id.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<InMemoryBrokerInner>,
}

struct InMemoryBrokerInner {
    state: RwLock<BrokerState>,
    /// Woken on every publish so waiting pulls can retry.
    published: Notify,
    config: InMemoryConfig,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicInfo>,
    subscriptions: HashMap<String, SubscriptionData>,
}

struct SubscriptionData {
    info: SubscriptionInfo,
    /// Messages waiting for delivery.
    available: VecDeque<QueuedMessage>,
    /// Delivered but unacknowledged messages.
    in_flight: HashMap<String, InFlightMessage>,
}

struct QueuedMessage {
    message: PublishedMessage,
    delivery_attempt: u32,
}

struct InFlightMessage {
    message: PublishedMessage,
    delivery_attempt: u32,
    expires_at: Instant,
}

impl SubscriptionData {
    fn new(info: SubscriptionInfo) -> Self {
        Self {
            info,
            available: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Move deliveries whose ack deadline passed back to the front of the queue.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.expires_at <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        let mut requeued: Vec<InFlightMessage> = expired
            .iter()
            .filter_map(|ack_id| self.in_flight.remove(ack_id))
            .collect();
        requeued.sort_by(|a, b| a.message.publish_time.cmp(&b.message.publish_time));

        debug!(
            subscription = %self.info.name,
            count = requeued.len(),
            "Requeueing expired deliveries"
        );

        for in_flight in requeued.into_iter().rev() {
            self.available.push_front(QueuedMessage {
                message: in_flight.message,
                delivery_attempt: in_flight.delivery_attempt,
            });
        }
    }

    fn take_batch(&mut self, max: usize, now: Instant) -> Result<Vec<ReceivedMessage>> {
        self.requeue_expired(now);

        let deadline = now + Duration::from_secs(u64::from(self.info.ack_deadline_seconds));
        let mut received = Vec::new();

        while received.len() < max {
            let Some(queued) = self.available.pop_front() else {
                break;
            };

            let ack_id = generate_ack_id(&self.info.name, &queued.message.message_id)?;
            let delivery_attempt = queued.delivery_attempt + 1;

            self.in_flight.insert(
                ack_id.clone(),
                InFlightMessage {
                    message: queued.message.clone(),
                    delivery_attempt,
                    expires_at: deadline,
                },
            );

            received.push(ReceivedMessage {
                ack_id,
                message: queued.message,
                delivery_attempt,
            });
        }

        Ok(received)
    }
}

impl InMemoryBroker {
    /// Create a new in-memory broker with default configuration.
    pub fn new() -> Self {
        Self::with_config(InMemoryConfig::default())
    }

    /// Create a new in-memory broker with custom configuration.
    pub fn with_config(config: InMemoryConfig) -> Self {
        info!(
            max_pull_batch = config.max_pull_batch,
            pull_wait_ms = config.pull_wait.as_millis() as u64,
            "Initializing in-memory broker"
        );

        Self {
            inner: Arc::new(InMemoryBrokerInner {
                state: RwLock::new(BrokerState::default()),
                published: Notify::new(),
                config,
            }),
        }
    }

    /// Number of messages waiting in a subscription, not counting in-flight ones.
    pub async fn backlog(&self, subscription: &str) -> Result<usize> {
        let state = self.inner.state.read().await;
        state
            .subscriptions
            .get(subscription)
            .map(|s| s.available.len())
            .ok_or_else(|| Error::SubscriptionNotFound(subscription.to_string()))
    }

    async fn try_pull(&self, subscription: &str, max: usize) -> Result<Vec<ReceivedMessage>> {
        let mut state = self.inner.state.write().await;
        let data = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::SubscriptionNotFound(subscription.to_string()))?;

        data.take_batch(max, Instant::now())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_path(name: &str) -> Result<ResourceName> {
    match ResourceName::parse(name)? {
        topic @ ResourceName::Topic { .. } => Ok(topic),
        _ => Err(ValidationError::InvalidParameter {
            name: "topic".to_string(),
            reason: format!("Not a topic path: {}", name),
        }
        .into()),
    }
}

fn subscription_path(name: &str) -> Result<ResourceName> {
    match ResourceName::parse(name)? {
        subscription @ ResourceName::Subscription { .. } => Ok(subscription),
        _ => Err(ValidationError::InvalidParameter {
            name: "subscription".to_string(),
            reason: format!("Not a subscription path: {}", name),
        }
        .into()),
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn create_topic(&self, topic: TopicInfo) -> Result<TopicInfo> {
        topic_path(&topic.name)?;

        let mut state = self.inner.state.write().await;
        if state.topics.contains_key(&topic.name) {
            return Err(Error::TopicAlreadyExists(topic.name));
        }

        info!(topic = %topic.name, "Created topic");
        state.topics.insert(topic.name.clone(), topic.clone());
        Ok(topic)
    }

    async fn get_topic(&self, name: &str) -> Result<TopicInfo> {
        let state = self.inner.state.read().await;
        state
            .topics
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(name.to_string()))
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.topics.remove(name).is_none() {
            return Err(Error::TopicNotFound(name.to_string()));
        }

        for data in state.subscriptions.values_mut() {
            if data.info.topic == name {
                debug!(subscription = %data.info.name, "Detaching subscription from deleted topic");
                data.info.topic = DELETED_TOPIC.to_string();
            }
        }

        info!(topic = %name, "Deleted topic");
        Ok(())
    }

    async fn list_topics(&self, project: &str) -> Result<Vec<TopicInfo>> {
        let prefix = format!("projects/{}/topics/", project);
        let state = self.inner.state.read().await;

        let mut topics: Vec<TopicInfo> = state
            .topics
            .values()
            .filter(|t| t.name.starts_with(&prefix))
            .cloned()
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    async fn create_subscription(
        &self,
        subscription: SubscriptionInfo,
    ) -> Result<SubscriptionInfo> {
        subscription_path(&subscription.name)?;
        topic_path(&subscription.topic)?;
        validate_ack_deadline(subscription.ack_deadline_seconds)?;

        let mut state = self.inner.state.write().await;
        if !state.topics.contains_key(&subscription.topic) {
            return Err(Error::TopicNotFound(subscription.topic));
        }
        if state.subscriptions.contains_key(&subscription.name) {
            return Err(Error::SubscriptionAlreadyExists(subscription.name));
        }

        info!(
            subscription = %subscription.name,
            topic = %subscription.topic,
            ack_deadline_seconds = subscription.ack_deadline_seconds,
            "Created subscription"
        );
        state.subscriptions.insert(
            subscription.name.clone(),
            SubscriptionData::new(subscription.clone()),
        );
        Ok(subscription)
    }

    async fn get_subscription(&self, name: &str) -> Result<SubscriptionInfo> {
        let state = self.inner.state.read().await;
        state
            .subscriptions
            .get(name)
            .map(|s| s.info.clone())
            .ok_or_else(|| Error::SubscriptionNotFound(name.to_string()))
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.subscriptions.remove(name).is_none() {
            return Err(Error::SubscriptionNotFound(name.to_string()));
        }

        info!(subscription = %name, "Deleted subscription");
        Ok(())
    }

    async fn list_subscriptions(&self, project: &str) -> Result<Vec<SubscriptionInfo>> {
        let prefix = format!("projects/{}/subscriptions/", project);
        let state = self.inner.state.read().await;

        let mut subscriptions: Vec<SubscriptionInfo> = state
            .subscriptions
            .values()
            .filter(|s| s.info.name.starts_with(&prefix))
            .map(|s| s.info.clone())
            .collect();
        subscriptions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subscriptions)
    }

    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<Vec<String>> {
        if messages.is_empty() {
            return Err(ValidationError::InvalidParameter {
                name: "messages".to_string(),
                reason: "Publish requires at least one message".to_string(),
            }
            .into());
        }
        for message in &messages {
            validate_message_size(&message.data)?;
            validate_attributes(&message.attributes)?;
        }

        let mut state = self.inner.state.write().await;
        if !state.topics.contains_key(topic) {
            return Err(Error::TopicNotFound(topic.to_string()));
        }

        let published: Vec<PublishedMessage> = messages
            .into_iter()
            .map(PublishedMessage::from_message)
            .collect();
        let message_ids: Vec<String> = published.iter().map(|m| m.message_id.clone()).collect();

        let mut fanout = 0usize;
        for data in state.subscriptions.values_mut().filter(|s| s.info.topic == topic) {
            fanout += 1;
            data.available.extend(published.iter().cloned().map(|message| QueuedMessage {
                message,
                delivery_attempt: 0,
            }));
        }
        drop(state);

        debug!(
            topic = %topic,
            count = message_ids.len(),
            subscriptions = fanout,
            "Published messages"
        );
        self.inner.published.notify_waiters();

        Ok(message_ids)
    }

    async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
        return_immediately: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        validate_max_messages(max_messages)?;
        let max = (max_messages as usize).min(self.inner.config.max_pull_batch);

        debug!(
            subscription = %subscription,
            max_messages = max,
            return_immediately,
            "Pulling messages"
        );

        if return_immediately {
            return self.try_pull(subscription, max).await;
        }

        let give_up_at = Instant::now() + self.inner.config.pull_wait;
        loop {
            // Register interest before checking so a publish in between is not missed.
            let notified = self.inner.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let received = self.try_pull(subscription, max).await?;
            if !received.is_empty() {
                return Ok(received);
            }

            if tokio::time::timeout_at(give_up_at, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Err(ValidationError::InvalidParameter {
                name: "ack_ids".to_string(),
                reason: "At least one ack id is required".to_string(),
            }
            .into());
        }

        let mut state = self.inner.state.write().await;
        let data = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::SubscriptionNotFound(subscription.to_string()))?;

        // Validate every id before removing any.
        let mut parsed = Vec::with_capacity(ack_ids.len());
        for ack_id in ack_ids {
            let decoded = parse_ack_id(ack_id)?;
            if decoded.subscription != subscription {
                return Err(Error::InvalidAckId(ack_id.clone()));
            }
            parsed.push((ack_id, decoded));
        }

        // Expired deliveries are back in the queue before any ack applies.
        data.requeue_expired(Instant::now());

        for (ack_id, ack) in parsed {
            // Unknown or expired deliveries are ignored, as the service does.
            if data.in_flight.remove(ack_id).is_none() {
                debug!(
                    subscription = %subscription,
                    message_id = %ack.message_id,
                    "Ignoring ack for unknown or expired delivery"
                );
            }
        }

        Ok(())
    }
}
