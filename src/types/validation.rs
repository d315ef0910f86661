//! Resource paths and validation for topic IDs, subscription IDs and messages.

use std::collections::HashMap;
use std::fmt;

use crate::Result;
use crate::error::{Error, ValidationError};

/// Maximum size of a message payload (10 MB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Maximum attribute key length in bytes.
pub const MAX_ATTRIBUTE_KEY_SIZE: usize = 256;

/// Maximum attribute value length in bytes.
pub const MAX_ATTRIBUTE_VALUE_SIZE: usize = 1024;

/// Topic path assigned to subscriptions whose topic was deleted.
pub const DELETED_TOPIC: &str = "_deleted-topic_";

/// A parsed Pub/Sub resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceName {
    /// projects/{project}/topics/{topic}
    Topic {
        /// Project ID.
        project: String,
        /// Topic ID.
        topic: String,
    },
    /// projects/{project}/subscriptions/{subscription}
    Subscription {
        /// Project ID.
        project: String,
        /// Subscription ID.
        subscription: String,
    },
}

impl ResourceName {
    /// Parse a full resource path.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('/').collect();

        if parts.len() != 4
            || parts[0] != "projects"
            || parts[1].is_empty()
            || parts[3].is_empty()
        {
            return Err(Error::Validation(ValidationError::InvalidParameter {
                name: "resource_name".to_string(),
                reason: format!("Invalid resource name format: {}", name),
            }));
        }

        let project = parts[1].to_string();
        let resource_id = parts[3].to_string();

        match parts[2] {
            "topics" => Ok(ResourceName::Topic {
                project,
                topic: resource_id,
            }),
            "subscriptions" => Ok(ResourceName::Subscription {
                project,
                subscription: resource_id,
            }),
            other => Err(Error::Validation(ValidationError::InvalidParameter {
                name: "resource_type".to_string(),
                reason: format!("Unknown resource type: {}", other),
            })),
        }
    }

    /// Project ID of the resource.
    pub fn project(&self) -> &str {
        match self {
            ResourceName::Topic { project, .. } => project,
            ResourceName::Subscription { project, .. } => project,
        }
    }

    /// Topic or subscription ID.
    pub fn resource_id(&self) -> &str {
        match self {
            ResourceName::Topic { topic, .. } => topic,
            ResourceName::Subscription { subscription, .. } => subscription,
        }
    }

    /// Format a topic path.
    pub fn topic(project: impl Into<String>, topic: impl Into<String>) -> String {
        format!("projects/{}/topics/{}", project.into(), topic.into())
    }

    /// Format a subscription path.
    pub fn subscription(project: impl Into<String>, subscription: impl Into<String>) -> String {
        format!(
            "projects/{}/subscriptions/{}",
            project.into(),
            subscription.into()
        )
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Topic { project, topic } => {
                write!(f, "projects/{}/topics/{}", project, topic)
            }
            ResourceName::Subscription {
                project,
                subscription,
            } => write!(f, "projects/{}/subscriptions/{}", project, subscription),
        }
    }
}

/// Shared rules for topic and subscription IDs.
///
/// IDs are 3-255 characters, start with a letter, do not start with `goog`,
/// and contain only letters, digits and `-_.~+%`.
fn check_resource_id(id: &str) -> std::result::Result<(), String> {
    if id.len() < 3 || id.len() > 255 {
        return Err(format!("must be 3-255 characters, got {}", id.len()));
    }

    if !id.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err("must start with a letter".to_string());
    }

    if id.to_ascii_lowercase().starts_with("goog") {
        return Err("must not start with \"goog\"".to_string());
    }

    if let Some(ch) = id.chars().find(|ch| {
        !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' | '+' | '%')
    }) {
        return Err(format!("contains invalid character: '{}'", ch));
    }

    Ok(())
}

/// Validate a topic ID.
pub fn validate_topic_id(topic_id: &str) -> Result<()> {
    check_resource_id(topic_id)
        .map_err(|reason| ValidationError::InvalidTopicId(format!("Topic ID {}", reason)).into())
}

/// Validate a subscription ID.
pub fn validate_subscription_id(subscription_id: &str) -> Result<()> {
    check_resource_id(subscription_id).map_err(|reason| {
        ValidationError::InvalidSubscriptionId(format!("Subscription ID {}", reason)).into()
    })
}

/// Validate a project ID.
///
/// Emulators accept arbitrary project names, so only emptiness and path
/// separators are rejected here.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.trim().is_empty() {
        return Err(invalid_parameter("project_id", "Project ID must not be empty"));
    }
    if project_id.contains('/') {
        return Err(invalid_parameter(
            "project_id",
            "Project ID must not contain '/'",
        ));
    }
    Ok(())
}

/// Validate message payload size.
pub fn validate_message_size(data: &[u8]) -> Result<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ValidationError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        }
        .into());
    }
    Ok(())
}

/// Validate message attributes.
pub fn validate_attributes(attributes: &HashMap<String, String>) -> Result<()> {
    for (key, value) in attributes {
        if key.is_empty() {
            return Err(ValidationError::InvalidAttribute(
                "Attribute key must not be empty".to_string(),
            )
            .into());
        }
        if key.len() > MAX_ATTRIBUTE_KEY_SIZE {
            return Err(ValidationError::InvalidAttribute(format!(
                "Attribute key '{}' exceeds {} bytes",
                key, MAX_ATTRIBUTE_KEY_SIZE
            ))
            .into());
        }
        if key.starts_with("goog") {
            return Err(ValidationError::InvalidAttribute(format!(
                "Attribute key '{}' uses the reserved \"goog\" prefix",
                key
            ))
            .into());
        }
        if value.len() > MAX_ATTRIBUTE_VALUE_SIZE {
            return Err(ValidationError::InvalidAttribute(format!(
                "Attribute '{}' value exceeds {} bytes",
                key, MAX_ATTRIBUTE_VALUE_SIZE
            ))
            .into());
        }
    }
    Ok(())
}

/// Validate an ack deadline (10-600 seconds).
pub fn validate_ack_deadline(seconds: u32) -> Result<()> {
    if !(10..=600).contains(&seconds) {
        return Err(invalid_parameter(
            "ack_deadline_seconds",
            format!("Ack deadline must be 10-600 seconds, got {}", seconds),
        ));
    }
    Ok(())
}

/// Validate the pull batch size.
pub fn validate_max_messages(max_messages: u32) -> Result<()> {
    if max_messages == 0 {
        return Err(invalid_parameter(
            "max_messages",
            "max_messages must be at least 1",
        ));
    }
    Ok(())
}

fn invalid_parameter(name: &str, reason: impl Into<String>) -> Error {
    Error::Validation(ValidationError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    })
}
