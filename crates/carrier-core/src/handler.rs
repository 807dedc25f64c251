//! Message-handler port and the bus surface available while handling.
//!
//! Handlers never hold the bus directly; they receive a [`HandlerContext`]
//! scoped to the message being processed. Sends made through the context are
//! registered on the ambient transaction and only reach the transport when
//! that transaction commits.

use crate::context::TransactionContext;
use crate::headers::{self, HeaderMap};
use crate::message::LogicalMessage;
use crate::{Duration, Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Handler port: processes one logical message within the ambient
/// transaction context
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle an incoming message
    async fn handle(&self, message: &LogicalMessage, ctx: &HandlerContext) -> Result<()>;
}

/// Bus operations reachable from inside a handler.
///
/// Every operation takes the transaction the send should ride on; the
/// [`HandlerContext`] convenience methods pass the ambient one.
#[async_trait]
pub trait BusHandle: Send + Sync {
    /// The bus's own input-queue address
    fn address(&self) -> &str;

    /// Send a message to the routed destination for its type
    async fn send(&self, message: LogicalMessage, tx: Arc<TransactionContext>) -> Result<()>;

    /// Send a message to an explicit destination address
    async fn send_to(
        &self,
        destination: &str,
        message: LogicalMessage,
        tx: Arc<TransactionContext>,
    ) -> Result<()>;

    /// Publish a message to all current subscribers of its topic
    async fn publish(&self, message: LogicalMessage, tx: Arc<TransactionContext>) -> Result<()>;

    /// Defer a message for later delivery to this bus's input queue
    async fn defer(
        &self,
        delay: Duration,
        message: LogicalMessage,
        tx: Arc<TransactionContext>,
    ) -> Result<()>;

    /// Subscribe this bus to the topic derived from a message type
    async fn subscribe(&self, message_type: &str, tx: Arc<TransactionContext>) -> Result<()>;

    /// Unsubscribe this bus from the topic derived from a message type
    async fn unsubscribe(&self, message_type: &str, tx: Arc<TransactionContext>) -> Result<()>;
}

/// Per-message scope handed to handlers: the incoming headers, the ambient
/// transaction, and the bus
#[derive(Clone)]
pub struct HandlerContext {
    headers: HeaderMap,
    transaction: Arc<TransactionContext>,
    bus: Arc<dyn BusHandle>,
}

impl HandlerContext {
    /// Create a handler context for one incoming message
    pub fn new(
        headers: HeaderMap,
        transaction: Arc<TransactionContext>,
        bus: Arc<dyn BusHandle>,
    ) -> Self {
        Self {
            headers,
            transaction,
            bus,
        }
    }

    /// Headers of the message being handled
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The ambient transaction context
    pub fn transaction(&self) -> &Arc<TransactionContext> {
        &self.transaction
    }

    /// The bus processing this message
    pub fn bus(&self) -> &Arc<dyn BusHandle> {
        &self.bus
    }

    /// Send a message to its routed destination within the ambient
    /// transaction
    pub async fn send(&self, message: LogicalMessage) -> Result<()> {
        self.bus
            .send(self.stamp_correlation(message), self.transaction.clone())
            .await
    }

    /// Reply to the sender of the message being handled.
    ///
    /// Fails when the incoming message carried no `return-address`.
    pub async fn reply(&self, message: LogicalMessage) -> Result<()> {
        let return_address = self
            .headers
            .get(headers::RETURN_ADDRESS)
            .ok_or_else(|| {
                Error::handler(format!(
                    "cannot reply: incoming message has no {} header",
                    headers::RETURN_ADDRESS
                ))
            })?
            .to_string();
        self.bus
            .send_to(
                &return_address,
                self.stamp_correlation(message),
                self.transaction.clone(),
            )
            .await
    }

    /// Publish a message within the ambient transaction
    pub async fn publish(&self, message: LogicalMessage) -> Result<()> {
        self.bus
            .publish(self.stamp_correlation(message), self.transaction.clone())
            .await
    }

    /// Defer a message back to this bus within the ambient transaction
    pub async fn defer(&self, delay: Duration, message: LogicalMessage) -> Result<()> {
        self.bus
            .defer(delay, self.stamp_correlation(message), self.transaction.clone())
            .await
    }

    // Outgoing messages inherit the conversation id (the incoming
    // message-id seeds it for conversations that lack one) and advance the
    // correlation sequence by one hop.
    fn stamp_correlation(&self, mut message: LogicalMessage) -> LogicalMessage {
        if !message.headers.contains_key(headers::CORRELATION_ID) {
            let correlation = self
                .headers
                .get(headers::CORRELATION_ID)
                .or_else(|| self.headers.get(headers::MESSAGE_ID));
            if let Some(correlation) = correlation {
                message
                    .headers
                    .insert(headers::CORRELATION_ID, correlation);
            }
        }
        let sequence = self
            .headers
            .get(headers::CORRELATION_SEQUENCE)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        message
            .headers
            .insert_if_absent(headers::CORRELATION_SEQUENCE, (sequence + 1).to_string());
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        sent: Mutex<Vec<(String, LogicalMessage)>>,
    }

    #[async_trait]
    impl BusHandle for RecordingBus {
        fn address(&self) -> &str {
            "recorder"
        }

        async fn send(&self, message: LogicalMessage, _tx: Arc<TransactionContext>) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(("<routed>".to_string(), message));
            Ok(())
        }

        async fn send_to(
            &self,
            destination: &str,
            message: LogicalMessage,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), message));
            Ok(())
        }

        async fn publish(
            &self,
            message: LogicalMessage,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(("<published>".to_string(), message));
            Ok(())
        }

        async fn defer(
            &self,
            _delay: Duration,
            message: LogicalMessage,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(("<deferred>".to_string(), message));
            Ok(())
        }

        async fn subscribe(&self, _message_type: &str, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }

        async fn unsubscribe(
            &self,
            _message_type: &str,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn fixture_context(bus: Arc<RecordingBus>, headers: HeaderMap) -> HandlerContext {
        HandlerContext::new(headers, Arc::new(TransactionContext::new()), bus)
    }

    #[tokio::test]
    async fn test_reply_uses_return_address() {
        let bus = Arc::new(RecordingBus::default());
        let headers = HeaderMap::from([
            (headers::MESSAGE_ID, "m-1"),
            (headers::RETURN_ADDRESS, "caller-queue"),
        ]);
        let fixture = fixture_context(bus.clone(), headers);

        fixture
            .reply(LogicalMessage::new("Pong", json!({})))
            .await
            .unwrap();

        let sent = bus.sent.lock().unwrap();
        let (actual_destination, actual_message) = &sent[0];
        assert_eq!(actual_destination, "caller-queue");
        assert_eq!(actual_message.message_type, "Pong");
    }

    #[tokio::test]
    async fn test_reply_without_return_address_fails() {
        let bus = Arc::new(RecordingBus::default());
        let fixture = fixture_context(bus, HeaderMap::new());

        let actual = fixture.reply(LogicalMessage::new("Pong", json!({}))).await;
        assert!(matches!(actual, Err(Error::Handler { .. })));
    }

    #[tokio::test]
    async fn test_outgoing_messages_inherit_correlation_id() {
        let bus = Arc::new(RecordingBus::default());
        let headers = HeaderMap::from([
            (headers::MESSAGE_ID, "m-1"),
            (headers::CORRELATION_ID, "c-9"),
        ]);
        let fixture = fixture_context(bus.clone(), headers);

        fixture
            .send(LogicalMessage::new("Next", json!({})))
            .await
            .unwrap();

        let sent = bus.sent.lock().unwrap();
        let actual = sent[0].1.headers.get(headers::CORRELATION_ID);
        assert_eq!(actual, Some("c-9"));
    }

    #[tokio::test]
    async fn test_message_id_seeds_correlation_id() {
        let bus = Arc::new(RecordingBus::default());
        let headers = HeaderMap::from([(headers::MESSAGE_ID, "m-1")]);
        let fixture = fixture_context(bus.clone(), headers);

        fixture
            .publish(LogicalMessage::new("Happened", json!({})))
            .await
            .unwrap();

        let sent = bus.sent.lock().unwrap();
        let actual = sent[0].1.headers.get(headers::CORRELATION_ID);
        assert_eq!(actual, Some("m-1"));
    }

    #[tokio::test]
    async fn test_correlation_sequence_advances_per_hop() {
        let bus = Arc::new(RecordingBus::default());
        let headers = HeaderMap::from([
            (headers::CORRELATION_ID, "c-1"),
            (headers::CORRELATION_SEQUENCE, "2"),
        ]);
        let fixture = fixture_context(bus.clone(), headers);

        fixture
            .send(LogicalMessage::new("Next", json!({})))
            .await
            .unwrap();

        let sent = bus.sent.lock().unwrap();
        let actual = sent[0].1.headers.get(headers::CORRELATION_SEQUENCE);
        assert_eq!(actual, Some("3"));
    }

    #[tokio::test]
    async fn test_first_hop_gets_sequence_one() {
        let bus = Arc::new(RecordingBus::default());
        let headers = HeaderMap::from([(headers::MESSAGE_ID, "m-1")]);
        let fixture = fixture_context(bus.clone(), headers);

        fixture
            .send(LogicalMessage::new("Next", json!({})))
            .await
            .unwrap();

        let sent = bus.sent.lock().unwrap();
        let actual = sent[0].1.headers.get(headers::CORRELATION_SEQUENCE);
        assert_eq!(actual, Some("1"));
    }

    #[tokio::test]
    async fn test_existing_correlation_id_is_kept() {
        let bus = Arc::new(RecordingBus::default());
        let headers = HeaderMap::from([(headers::CORRELATION_ID, "c-1")]);
        let fixture = fixture_context(bus.clone(), headers);

        let message =
            LogicalMessage::new("Next", json!({})).with_header(headers::CORRELATION_ID, "c-own");
        fixture.send(message).await.unwrap();

        let sent = bus.sent.lock().unwrap();
        let actual = sent[0].1.headers.get(headers::CORRELATION_ID);
        assert_eq!(actual, Some("c-own"));
    }
}
