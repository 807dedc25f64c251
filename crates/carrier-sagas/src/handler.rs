use crate::data::{ActiveSaga, CorrelationProperty};
use async_trait::async_trait;
use carrier_core::{HandlerContext, Json, LogicalMessage, Result};

/// A handler participating in a saga.
///
/// The saga engine mediates every invocation: it resolves the saga instance
/// by correlation value under the exclusive-access lock, creates a fresh
/// instance when the handler initiates on the message type, and persists the
/// result with optimistic concurrency afterwards.
#[async_trait]
pub trait SagaHandler: Send + Sync {
    /// Logical type name of the saga data this handler works on
    fn data_type(&self) -> &str;

    /// Initial saga data for a newly initiated instance. The engine fills in
    /// the correlation property afterwards.
    fn initial_data(&self) -> Json;

    /// Whether a message of this type may start a new saga instance
    fn is_initiator(&self, message_type: &str) -> bool;

    /// The correlation property for a message type, or `None` when the
    /// handler does not handle that type
    fn correlation(&self, message_type: &str) -> Option<CorrelationProperty>;

    /// Every correlation property path of the saga data, for the uniqueness
    /// index maintained by storage
    fn correlation_properties(&self) -> Vec<String>;

    /// Handle the message against the resolved saga instance
    async fn handle(
        &self,
        saga: &mut ActiveSaga,
        message: &LogicalMessage,
        ctx: &HandlerContext,
    ) -> Result<()>;
}
