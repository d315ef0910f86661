//! Broker client trait and implementations.
//!
//! A [`Broker`] is the boundary to the messaging service: every method maps
//! to one Pub/Sub RPC and takes full resource paths
//! (`projects/{project}/topics/{topic}`).

use async_trait::async_trait;

use crate::Result;
use crate::types::{Message, ReceivedMessage, SubscriptionInfo, TopicInfo};

pub mod memory;
pub mod rest;

/// Broker client trait.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create a topic.
    async fn create_topic(&self, topic: TopicInfo) -> Result<TopicInfo>;

    /// Get a topic by path.
    async fn get_topic(&self, name: &str) -> Result<TopicInfo>;

    /// Delete a topic. Its subscriptions stay, detached.
    async fn delete_topic(&self, name: &str) -> Result<()>;

    /// List all topics of a project.
    async fn list_topics(&self, project: &str) -> Result<Vec<TopicInfo>>;

    /// Create a subscription attached to `subscription.topic`.
    async fn create_subscription(&self, subscription: SubscriptionInfo)
        -> Result<SubscriptionInfo>;

    /// Get a subscription by path.
    async fn get_subscription(&self, name: &str) -> Result<SubscriptionInfo>;

    /// Delete a subscription.
    async fn delete_subscription(&self, name: &str) -> Result<()>;

    /// List all subscriptions of a project.
    async fn list_subscriptions(&self, project: &str) -> Result<Vec<SubscriptionInfo>>;

    /// Publish messages to a topic, returning their IDs in order.
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<Vec<String>>;

    /// Pull up to `max_messages` from a subscription.
    ///
    /// With `return_immediately` unset the broker may wait for messages
    /// before answering with an empty batch.
    async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
        return_immediately: bool,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge deliveries by ack id.
    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()>;
}
