//! Subscribe/unsubscribe wire commands.
//!
//! Against non-centralized storage, a subscribing bus sends one of these
//! commands to the publisher's queue; built-in handlers on the publisher
//! mutate its local storage. Both commands are idempotent.

use serde::{Deserialize, Serialize};

/// Logical type name of [`SubscribeRequest`]
pub const SUBSCRIBE_REQUEST_TYPE: &str = "carrier.SubscribeRequest";

/// Logical type name of [`UnsubscribeRequest`]
pub const UNSUBSCRIBE_REQUEST_TYPE: &str = "carrier.UnsubscribeRequest";

/// Ask a publisher to register a subscriber for a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Topic to subscribe to
    pub topic: String,
    /// Queue address of the subscriber
    pub subscriber_address: String,
}

/// Ask a publisher to remove a subscriber from a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Topic to unsubscribe from
    pub topic: String,
    /// Queue address of the subscriber
    pub subscriber_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subscribe_request_round_trip() {
        let fixture = SubscribeRequest {
            topic: "orders.OrderPlaced".to_string(),
            subscriber_address: "billing".to_string(),
        };

        let serialized = serde_json::to_string(&fixture).unwrap();
        let actual: SubscribeRequest = serde_json::from_str(&serialized).unwrap();
        assert_eq!(actual, fixture);
    }

    #[test]
    fn test_request_type_names_are_distinct() {
        assert!(SUBSCRIBE_REQUEST_TYPE != UNSUBSCRIBE_REQUEST_TYPE);
    }
}
