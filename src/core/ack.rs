//! Ack id generation and parsing.
//!
//! An ack id is base64-encoded JSON naming the subscription, the message and
//! a per-delivery nonce, so two deliveries of one message never share an id.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Decoded ack id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckIdData {
    /// Full subscription path.
    pub subscription: String,
    /// Message ID.
    pub message_id: String,
    /// Per-delivery nonce.
    pub nonce: String,
}

/// Generate an ack id for one delivery of a message.
pub fn generate_ack_id(subscription: &str, message_id: &str) -> Result<String> {
    let data = AckIdData {
        subscription: subscription.to_string(),
        message_id: message_id.to_string(),
        nonce: Uuid::new_v4().to_string(),
    };

    let json = serde_json::to_string(&data)?;
    Ok(STANDARD.encode(json.as_bytes()))
}

/// Parse an ack id.
pub fn parse_ack_id(ack_id: &str) -> Result<AckIdData> {
    let invalid = || Error::InvalidAckId(ack_id.to_string());

    let decoded = STANDARD.decode(ack_id).map_err(|_| invalid())?;
    let json = String::from_utf8(decoded).map_err(|_| invalid())?;

    serde_json::from_str(&json).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_id_roundtrip() {
        let subscription = "projects/p/subscriptions/s1";
        let ack_id = generate_ack_id(subscription, "m-1").unwrap();
        let parsed = parse_ack_id(&ack_id).unwrap();

        assert_eq!(parsed.subscription, subscription);
        assert_eq!(parsed.message_id, "m-1");
        assert!(!parsed.nonce.is_empty());
    }

    #[test]
    fn test_ack_ids_are_unique_per_delivery() {
        let first = generate_ack_id("projects/p/subscriptions/s1", "m-1").unwrap();
        let second = generate_ack_id("projects/p/subscriptions/s1", "m-1").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_parse_invalid_ack_id() {
        assert!(matches!(parse_ack_id("invalid"), Err(Error::InvalidAckId(_))));
        assert!(parse_ack_id("").is_err());
        assert!(parse_ack_id(&STANDARD.encode("not json")).is_err());
    }
}
