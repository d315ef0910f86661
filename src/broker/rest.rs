//! Broker client for the Pub/Sub v1 REST API.
//!
//! Works against `https://pubsub.googleapis.com` or any emulator exposing the
//! same surface. JSON bodies use camelCase and message data travels as
//! standard base64.
//!
//! ## Endpoints used
//!
//! - `PUT|GET|DELETE /v1/projects/{project}/topics/{topic}`
//! - `GET /v1/projects/{project}/topics`
//! - `POST /v1/projects/{project}/topics/{topic}:publish`
//! - `PUT|GET|DELETE /v1/projects/{project}/subscriptions/{subscription}`
//! - `GET /v1/projects/{project}/subscriptions`
//! - `POST /v1/projects/{project}/subscriptions/{subscription}:pull`
//! - `POST /v1/projects/{project}/subscriptions/{subscription}:acknowledge`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broker::Broker;
use crate::types::{Message, PublishedMessage, ReceivedMessage, SubscriptionInfo, TopicInfo};
use crate::{Error, Result};

/// Public endpoint of Google Cloud Pub/Sub.
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Configuration for the REST broker.
#[derive(Debug, Clone)]
pub struct RestBrokerConfig {
    /// Base URL, without the `/v1` suffix.
    pub endpoint: String,
    /// Static bearer token sent with every request.
    pub access_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for RestBrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Broker talking to the Pub/Sub REST API.
#[derive(Clone)]
pub struct RestBroker {
    client: Client,
    endpoint: String,
    base: Url,
    access_token: Option<String>,
}

/// Which resource a request addresses, for mapping 404/409 responses.
#[derive(Clone, Copy)]
enum Resource<'a> {
    Topic(&'a str),
    Subscription(&'a str),
}

impl Resource<'_> {
    fn not_found(self) -> Error {
        match self {
            Resource::Topic(name) => Error::TopicNotFound(name.to_string()),
            Resource::Subscription(name) => Error::SubscriptionNotFound(name.to_string()),
        }
    }

    fn already_exists(self) -> Error {
        match self {
            Resource::Topic(name) => Error::TopicAlreadyExists(name.to_string()),
            Resource::Subscription(name) => Error::SubscriptionAlreadyExists(name.to_string()),
        }
    }
}

impl RestBroker {
    /// Create a REST broker.
    pub fn new(config: RestBrokerConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let base = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Endpoint '{}' cannot carry a path",
                endpoint
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            base,
            access_token: config.access_token,
        })
    }

    /// Base URL this broker talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build `{endpoint}/v1/{path}`, percent-encoding each path segment.
    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("v1").extend(path.split('/'));
        }
        url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(method = %method, url = %url, "Pub/Sub REST request");

        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and turn non-success statuses into errors.
    async fn send(&self, builder: RequestBuilder, resource: Resource<'_>) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        debug!(status = status.as_u16(), message = %message, "Pub/Sub REST error");

        Err(match status {
            StatusCode::NOT_FOUND => resource.not_found(),
            StatusCode::CONFLICT => resource.already_exists(),
            _ => Error::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        resource: Resource<'_>,
    ) -> Result<T> {
        let response = self.send(builder, resource).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Follow `nextPageToken` until every page of a list call is read.
    async fn list_all<P, T>(&self, path: &str, resource: Resource<'_>) -> Result<Vec<T>>
    where
        P: DeserializeOwned + Page<T>,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut builder = self.request(Method::GET, path);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token)]);
            }

            let page: P = self.send_json(builder, resource).await?;
            let (mut batch, next) = page.into_parts();
            items.append(&mut batch);

            match next {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl Broker for RestBroker {
    async fn create_topic(&self, topic: TopicInfo) -> Result<TopicInfo> {
        let body = Topic::from(&topic);
        let created: Topic = self
            .send_json(
                self.request(Method::PUT, &topic.name).json(&body),
                Resource::Topic(&topic.name),
            )
            .await?;
        Ok(created.into_info(&topic.name))
    }

    async fn get_topic(&self, name: &str) -> Result<TopicInfo> {
        let topic: Topic = self
            .send_json(self.request(Method::GET, name), Resource::Topic(name))
            .await?;
        Ok(topic.into_info(name))
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, name), Resource::Topic(name))
            .await?;
        Ok(())
    }

    async fn list_topics(&self, project: &str) -> Result<Vec<TopicInfo>> {
        let path = format!("projects/{}/topics", project);
        let topics: Vec<Topic> = self
            .list_all::<ListTopicsResponse, Topic>(&path, Resource::Topic(&path))
            .await?;
        Ok(topics.into_iter().map(|t| t.into_info("")).collect())
    }

    async fn create_subscription(
        &self,
        subscription: SubscriptionInfo,
    ) -> Result<SubscriptionInfo> {
        let body = Subscription::from(&subscription);
        let builder = self.request(Method::PUT, &subscription.name).json(&body);

        // A 404 here means the topic is missing; a 409 means the subscription exists.
        let response = self.send(builder, Resource::Subscription(&subscription.name)).await;
        let response = match response {
            Err(Error::SubscriptionNotFound(_)) => {
                return Err(Error::TopicNotFound(subscription.topic));
            }
            other => other?,
        };

        let body = response.bytes().await?;
        let created: Subscription = serde_json::from_slice(&body)?;
        Ok(created.into_info(&subscription.name))
    }

    async fn get_subscription(&self, name: &str) -> Result<SubscriptionInfo> {
        let subscription: Subscription = self
            .send_json(self.request(Method::GET, name), Resource::Subscription(name))
            .await?;
        Ok(subscription.into_info(name))
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, name),
            Resource::Subscription(name),
        )
        .await?;
        Ok(())
    }

    async fn list_subscriptions(&self, project: &str) -> Result<Vec<SubscriptionInfo>> {
        let path = format!("projects/{}/subscriptions", project);
        let subscriptions: Vec<Subscription> = self
            .list_all::<ListSubscriptionsResponse, Subscription>(
                &path,
                Resource::Subscription(&path),
            )
            .await?;
        Ok(subscriptions
            .into_iter()
            .map(|s| s.into_info(""))
            .collect())
    }

    async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<Vec<String>> {
        let body = PublishRequest {
            messages: messages.into_iter().map(PubsubMessage::from).collect(),
        };
        let response: PublishResponse = self
            .send_json(
                self.request(Method::POST, &format!("{}:publish", topic))
                    .json(&body),
                Resource::Topic(topic),
            )
            .await?;
        Ok(response.message_ids)
    }

    async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
        return_immediately: bool,
    ) -> Result<Vec<ReceivedMessage>> {
        let body = PullRequest {
            max_messages: max_messages as i32,
            return_immediately,
        };
        let response: PullResponse = self
            .send_json(
                self.request(Method::POST, &format!("{}:pull", subscription))
                    .json(&body),
                Resource::Subscription(subscription),
            )
            .await?;

        response
            .received_messages
            .unwrap_or_default()
            .into_iter()
            .map(RestReceivedMessage::into_received)
            .collect()
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        let body = AcknowledgeRequest {
            ack_ids: ack_ids.to_vec(),
        };
        self.send(
            self.request(Method::POST, &format!("{}:acknowledge", subscription))
                .json(&body),
            Resource::Subscription(subscription),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// A list response split into items and the next page token.
pub trait Page<T> {
    /// Items and next page token.
    fn into_parts(self) -> (Vec<T>, Option<String>);
}

/// Error envelope used by Google Cloud APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Error detail information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// HTTP status code.
    pub code: u16,
    /// Error message.
    pub message: String,
    /// Status string such as `NOT_FOUND`.
    #[serde(default)]
    pub status: String,
}

/// Topic resource representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Topic path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

impl Topic {
    fn into_info(self, fallback_name: &str) -> TopicInfo {
        TopicInfo {
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            labels: self.labels.unwrap_or_default(),
        }
    }
}

impl From<&TopicInfo> for Topic {
    fn from(info: &TopicInfo) -> Self {
        Topic {
            name: Some(info.name.clone()),
            labels: (!info.labels.is_empty()).then(|| info.labels.clone()),
        }
    }
}

/// Response for listing topics.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTopicsResponse {
    /// Topics on this page.
    #[serde(default)]
    pub topics: Vec<Topic>,
    /// Token for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl Page<Topic> for ListTopicsResponse {
    fn into_parts(self) -> (Vec<Topic>, Option<String>) {
        (self.topics, self.next_page_token)
    }
}

/// A Pub/Sub subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Subscription path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Topic path.
    pub topic: String,
    /// Ack deadline in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_deadline_seconds: Option<i32>,
    /// Whether acknowledged messages are retained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain_acked_messages: Option<bool>,
    /// Labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// Filter expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Subscription {
    fn into_info(self, fallback_name: &str) -> SubscriptionInfo {
        SubscriptionInfo {
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            topic: self.topic,
            ack_deadline_seconds: self.ack_deadline_seconds.unwrap_or(10).max(0) as u32,
            labels: self.labels.unwrap_or_default(),
            retain_acked_messages: self.retain_acked_messages.unwrap_or(false),
            filter: self.filter.filter(|f| !f.is_empty()),
        }
    }
}

impl From<&SubscriptionInfo> for Subscription {
    fn from(info: &SubscriptionInfo) -> Self {
        Subscription {
            name: Some(info.name.clone()),
            topic: info.topic.clone(),
            ack_deadline_seconds: Some(info.ack_deadline_seconds as i32),
            retain_acked_messages: info.retain_acked_messages.then_some(true),
            labels: (!info.labels.is_empty()).then(|| info.labels.clone()),
            filter: info.filter.clone(),
        }
    }
}

/// Response for listing subscriptions.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSubscriptionsResponse {
    /// Subscriptions on this page.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Token for the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl Page<Subscription> for ListSubscriptionsResponse {
    fn into_parts(self) -> (Vec<Subscription>, Option<String>) {
        (self.subscriptions, self.next_page_token)
    }
}

/// Request for publishing messages.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Messages to publish.
    pub messages: Vec<PubsubMessage>,
}

/// A Pub/Sub message on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Message data (base64-encoded on the wire).
    #[serde(with = "base64_data", default)]
    pub data: Vec<u8>,
    /// Attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
    /// Message ID (set by server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Publish timestamp in RFC 3339 (set by server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    /// Ordering key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering_key: Option<String>,
}

impl From<Message> for PubsubMessage {
    fn from(message: Message) -> Self {
        PubsubMessage {
            data: message.data,
            attributes: (!message.attributes.is_empty()).then_some(message.attributes),
            message_id: None,
            publish_time: None,
            ordering_key: message.ordering_key,
        }
    }
}

impl From<&PublishedMessage> for PubsubMessage {
    fn from(message: &PublishedMessage) -> Self {
        PubsubMessage {
            data: message.data.clone(),
            attributes: (!message.attributes.is_empty()).then(|| message.attributes.clone()),
            message_id: Some(message.message_id.clone()),
            publish_time: Some(message.publish_time.to_rfc3339()),
            ordering_key: message.ordering_key.clone(),
        }
    }
}

impl PubsubMessage {
    /// Convert a delivered wire message into a [`PublishedMessage`].
    pub fn into_published(self) -> Result<PublishedMessage> {
        let publish_time = match self.publish_time.as_deref() {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| Error::Internal(format!("Invalid publishTime '{}': {}", raw, e)))?
                .with_timezone(&Utc),
            None => {
                return Err(Error::Internal(
                    "Delivered message is missing publishTime".to_string(),
                ));
            }
        };

        Ok(PublishedMessage {
            message_id: self.message_id.unwrap_or_default(),
            publish_time,
            data: self.data,
            attributes: self.attributes.unwrap_or_default(),
            ordering_key: self.ordering_key.filter(|k| !k.is_empty()),
        })
    }
}

// Base64 encoding/decoding helpers
mod base64_data {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// Response for publishing messages.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Message IDs assigned by the server.
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Request for pulling messages.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Maximum number of messages to return.
    pub max_messages: i32,
    /// Whether to return immediately if no messages are available.
    #[serde(default)]
    pub return_immediately: bool,
}

/// Response for pulling messages.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Received messages; absent when nothing was delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_messages: Option<Vec<RestReceivedMessage>>,
}

/// A received message on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestReceivedMessage {
    /// Acknowledgment ID.
    pub ack_id: String,
    /// The message.
    pub message: PubsubMessage,
    /// Delivery attempt counter, only sent for dead-lettering subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_attempt: Option<i32>,
}

impl RestReceivedMessage {
    fn into_received(self) -> Result<ReceivedMessage> {
        Ok(ReceivedMessage {
            ack_id: self.ack_id,
            message: self.message.into_published()?,
            delivery_attempt: self.delivery_attempt.unwrap_or(1).max(1) as u32,
        })
    }
}

impl From<&ReceivedMessage> for RestReceivedMessage {
    fn from(received: &ReceivedMessage) -> Self {
        RestReceivedMessage {
            ack_id: received.ack_id.clone(),
            message: PubsubMessage::from(&received.message),
            delivery_attempt: Some(received.delivery_attempt as i32),
        }
    }
}

/// Request for acknowledging messages.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    /// Acknowledgment IDs.
    pub ack_ids: Vec<String>,
}
