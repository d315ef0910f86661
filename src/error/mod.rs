//! Error types for pubwrap.

use thiserror::Error;

/// Result type for pubwrap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pubwrap.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Topic not found.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// Subscription not found.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Topic already exists.
    #[error("Topic already exists: {0}")]
    TopicAlreadyExists(String),

    /// Subscription already exists.
    #[error("Subscription already exists: {0}")]
    SubscriptionAlreadyExists(String),

    /// Ack id could not be decoded or does not belong to the subscription.
    #[error("Invalid ack id: {0}")]
    InvalidAckId(String),

    /// The broker could not be reached.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The broker answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message reported by the broker.
        message: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error reports a missing topic or subscription.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::TopicNotFound(_) | Error::SubscriptionNotFound(_))
    }

    /// Whether the error reports a resource that already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::TopicAlreadyExists(_) | Error::SubscriptionAlreadyExists(_)
        )
    }
}

/// Validation error types.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid topic ID.
    #[error("Invalid topic ID: {0}")]
    InvalidTopicId(String),

    /// Invalid subscription ID.
    #[error("Invalid subscription ID: {0}")]
    InvalidSubscriptionId(String),

    /// Message too large.
    #[error("Message too large: {size} bytes (max: {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Invalid attribute.
    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Invalid parameter.
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Reason for invalidity.
        reason: String,
    },
}
