use async_trait::async_trait;
use carrier_core::{Result, TransactionContext, TransportMessage};

/// Transport port: queue-level driver that moves messages between named
/// addresses within a transaction context.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The input-queue address this transport receives from
    fn address(&self) -> &str;

    /// Create a queue for the given address. Idempotent.
    async fn create_queue(&self, address: &str) -> Result<()>;

    /// Send a message to a destination queue.
    ///
    /// Delivery is registered on the transaction's commit; an aborted
    /// transaction sends nothing. Messages flagged `express` may be
    /// delivered immediately instead.
    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        ctx: &TransactionContext,
    ) -> Result<()>;

    /// Receive the next message from the input queue, or `None` when the
    /// queue is empty.
    ///
    /// The message is returned to the queue when the transaction aborts and
    /// is acknowledged exactly once when it commits.
    async fn receive(&self, ctx: &TransactionContext) -> Result<Option<TransportMessage>>;

    /// Whether the transport honors `deferred-until` natively.
    ///
    /// When true, the bus removes the deferral steps from the incoming
    /// pipeline at configuration time.
    fn supports_deferred_delivery(&self) -> bool {
        false
    }
}
