//! Built-in handlers for the subscribe/unsubscribe wire commands.
//!
//! Every bus with local (non-centralized) subscription storage registers
//! these, so remote endpoints can subscribe to events it publishes. Both
//! operations are idempotent.

use async_trait::async_trait;
use carrier_core::{HandlerContext, LogicalMessage, MessageHandler, Result};
use carrier_pubsub::{SubscribeRequest, SubscriptionStorage, UnsubscribeRequest};
use std::sync::Arc;
use tracing::info;

/// Handles `carrier.SubscribeRequest` by registering the subscriber locally
pub struct SubscribeRequestHandler {
    storage: Arc<dyn SubscriptionStorage>,
}

impl SubscribeRequestHandler {
    /// Create the handler over the publisher's subscription storage
    pub fn new(storage: Arc<dyn SubscriptionStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MessageHandler for SubscribeRequestHandler {
    async fn handle(&self, message: &LogicalMessage, _ctx: &HandlerContext) -> Result<()> {
        let request: SubscribeRequest = serde_json::from_value(message.body.clone())?;
        info!(
            topic = %request.topic,
            subscriber = %request.subscriber_address,
            "registering subscriber"
        );
        self.storage
            .register(&request.topic, &request.subscriber_address)
            .await
    }
}

/// Handles `carrier.UnsubscribeRequest` by removing the subscriber locally
pub struct UnsubscribeRequestHandler {
    storage: Arc<dyn SubscriptionStorage>,
}

impl UnsubscribeRequestHandler {
    /// Create the handler over the publisher's subscription storage
    pub fn new(storage: Arc<dyn SubscriptionStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MessageHandler for UnsubscribeRequestHandler {
    async fn handle(&self, message: &LogicalMessage, _ctx: &HandlerContext) -> Result<()> {
        let request: UnsubscribeRequest = serde_json::from_value(message.body.clone())?;
        info!(
            topic = %request.topic,
            subscriber = %request.subscriber_address,
            "removing subscriber"
        );
        self.storage
            .unregister(&request.topic, &request.subscriber_address)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrier_core::{BusHandle, Duration, HeaderMap, TransactionContext};
    use carrier_pubsub::InMemorySubscriptionStorage;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct NullBus;

    #[async_trait]
    impl BusHandle for NullBus {
        fn address(&self) -> &str {
            "publisher"
        }
        async fn send(&self, _m: LogicalMessage, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
        async fn send_to(
            &self,
            _d: &str,
            _m: LogicalMessage,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            Ok(())
        }
        async fn publish(&self, _m: LogicalMessage, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
        async fn defer(
            &self,
            _delay: Duration,
            _m: LogicalMessage,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _t: &str, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _t: &str, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
    }

    fn fixture_ctx() -> HandlerContext {
        HandlerContext::new(
            HeaderMap::new(),
            Arc::new(TransactionContext::new()),
            Arc::new(NullBus),
        )
    }

    fn subscribe_message(topic: &str, subscriber: &str) -> LogicalMessage {
        LogicalMessage::new(
            carrier_pubsub::SUBSCRIBE_REQUEST_TYPE,
            json!({"topic": topic, "subscriber_address": subscriber}),
        )
    }

    #[tokio::test]
    async fn test_subscribe_request_registers_the_subscriber() {
        let storage = Arc::new(InMemorySubscriptionStorage::new());
        let handler = SubscribeRequestHandler::new(storage.clone());

        handler
            .handle(&subscribe_message("orders.OrderPlaced", "billing"), &fixture_ctx())
            .await
            .unwrap();

        let actual = storage.get_subscribers("orders.OrderPlaced").await.unwrap();
        let expected = vec!["billing".to_string()];
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_subscribe_request_is_idempotent() {
        let storage = Arc::new(InMemorySubscriptionStorage::new());
        let handler = SubscribeRequestHandler::new(storage.clone());
        let message = subscribe_message("topic", "billing");

        handler.handle(&message, &fixture_ctx()).await.unwrap();
        handler.handle(&message, &fixture_ctx()).await.unwrap();

        assert_eq!(storage.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_request_removes_the_subscriber() {
        let storage = Arc::new(InMemorySubscriptionStorage::new());
        storage.register("topic", "billing").await.unwrap();
        let handler = UnsubscribeRequestHandler::new(storage.clone());
        let message = LogicalMessage::new(
            carrier_pubsub::UNSUBSCRIBE_REQUEST_TYPE,
            json!({"topic": "topic", "subscriber_address": "billing"}),
        );

        handler.handle(&message, &fixture_ctx()).await.unwrap();

        assert_eq!(storage.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_request_body_fails() {
        let storage = Arc::new(InMemorySubscriptionStorage::new());
        let handler = SubscribeRequestHandler::new(storage);
        let message = LogicalMessage::new(
            carrier_pubsub::SUBSCRIBE_REQUEST_TYPE,
            json!({"nope": true}),
        );

        let actual = handler.handle(&message, &fixture_ctx()).await;
        assert!(actual.is_err());
    }
}
