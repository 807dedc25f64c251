use carrier_core::{LogicalMessage, TransactionContext, TransportMessage};
use std::sync::Arc;

/// Context threaded through the incoming step chain for one received
/// message.
///
/// The serializer step fills in `logical`; everything downstream of it can
/// rely on the decoded form.
#[derive(Debug)]
pub struct IncomingContext {
    /// The wire message as received
    pub message: TransportMessage,
    /// The transaction governing this delivery
    pub transaction: Arc<TransactionContext>,
    /// Decoded form of the message, once the serializer step ran
    pub logical: Option<LogicalMessage>,
}

impl IncomingContext {
    /// Create an incoming context around a received message
    pub fn new(message: TransportMessage, transaction: Arc<TransactionContext>) -> Self {
        Self {
            message,
            transaction,
            logical: None,
        }
    }
}

/// Context threaded through the outgoing step chain for one send.
///
/// The serializer step fills in `wire`; the send step expects it.
#[derive(Debug)]
pub struct OutgoingContext {
    /// Destination queue addresses (more than one for a publish)
    pub destinations: Vec<String>,
    /// The logical message being sent
    pub logical: LogicalMessage,
    /// The transaction the send rides on
    pub transaction: Arc<TransactionContext>,
    /// Serialized form of the message, once the serializer step ran
    pub wire: Option<TransportMessage>,
}

impl OutgoingContext {
    /// Create an outgoing context for a send to one destination
    pub fn new(
        destination: impl Into<String>,
        logical: LogicalMessage,
        transaction: Arc<TransactionContext>,
    ) -> Self {
        Self {
            destinations: vec![destination.into()],
            logical,
            transaction,
            wire: None,
        }
    }

    /// Create an outgoing context for a send to several destinations
    pub fn new_multi(
        destinations: Vec<String>,
        logical: LogicalMessage,
        transaction: Arc<TransactionContext>,
    ) -> Self {
        Self {
            destinations,
            logical,
            transaction,
            wire: None,
        }
    }
}
