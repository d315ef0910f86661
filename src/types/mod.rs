//! Common data types for pubwrap.

pub mod validation;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Message attributes.
pub type MessageAttributes = HashMap<String, String>;

/// An outgoing message: opaque payload plus string attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Message attributes.
    #[serde(default)]
    pub attributes: MessageAttributes,
    /// Ordering key, if the topic uses ordered delivery.
    #[serde(default)]
    pub ordering_key: Option<String>,
}

impl Message {
    /// Create a message from raw bytes or a string.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            attributes: MessageAttributes::new(),
            ordering_key: None,
        }
    }

    /// Create a message whose payload is the JSON encoding of `value`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> crate::Result<Self> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Replace all attributes.
    pub fn with_attributes(mut self, attributes: MessageAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the ordering key.
    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }
}

impl From<&str> for Message {
    fn from(data: &str) -> Self {
        Message::new(data)
    }
}

impl From<String> for Message {
    fn from(data: String) -> Self {
        Message::new(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::new(data)
    }
}

/// A message whose data is encoded as JSON at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonMessage<T> {
    /// Value serialized into the payload.
    pub data: T,
    /// Message attributes, published verbatim.
    #[serde(default)]
    pub attributes: MessageAttributes,
}

impl<T: Serialize> JsonMessage<T> {
    /// Wrap a value without attributes.
    pub fn new(data: T) -> Self {
        Self {
            data,
            attributes: MessageAttributes::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Encode into a raw [`Message`].
    pub fn encode(&self) -> crate::Result<Message> {
        Ok(Message::json(&self.data)?.with_attributes(self.attributes.clone()))
    }
}

/// A message as stored by the broker and delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedMessage {
    /// Message ID.
    pub message_id: String,
    /// When the broker accepted the message.
    pub publish_time: DateTime<Utc>,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Message attributes.
    pub attributes: MessageAttributes,
    /// Ordering key.
    pub ordering_key: Option<String>,
}

impl PublishedMessage {
    /// Stamp an outgoing message with an ID and publish time.
    pub fn from_message(message: Message) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            publish_time: Utc::now(),
            data: message.data,
            attributes: message.attributes,
            ordering_key: message.ordering_key,
        }
    }

    /// Decode the payload as UTF-8 JSON.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Payload as UTF-8 text, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// A delivered message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Token used to acknowledge this delivery.
    pub ack_id: String,
    /// The delivered message.
    pub message: PublishedMessage,
    /// How many times the message has been delivered, including this one.
    pub delivery_attempt: u32,
}

/// Topic as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    /// Full topic path.
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl TopicInfo {
    /// Topic with no labels.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: HashMap::new(),
        }
    }
}

/// Subscription as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Full subscription path.
    pub name: String,
    /// Full path of the attached topic.
    pub topic: String,
    /// Ack deadline in seconds.
    pub ack_deadline_seconds: u32,
    /// Labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Whether acknowledged messages are retained.
    #[serde(default)]
    pub retain_acked_messages: bool,
    /// Filter expression.
    #[serde(default)]
    pub filter: Option<String>,
}

/// Optional settings merged into a create-subscription request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Ack deadline in seconds (10-600); broker default when unset.
    pub ack_deadline_seconds: Option<u32>,
    /// Labels.
    pub labels: HashMap<String, String>,
    /// Whether acknowledged messages are retained.
    pub retain_acked_messages: bool,
    /// Filter expression.
    pub filter: Option<String>,
}

impl SubscriptionOptions {
    /// Set the ack deadline.
    pub fn with_ack_deadline(mut self, seconds: u32) -> Self {
        self.ack_deadline_seconds = Some(seconds);
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
