use async_trait::async_trait;
use carrier_core::{headers, Error, Result};
use carrier_pipeline::{IncomingContext, IncomingNext, IncomingStep};
use carrier_timeouts::{DeferredEnvelope, TimeoutStore};
use carrier_transport::Transport;
use std::sync::Arc;
use tracing::debug;

/// Forwards deferred messages to an external timeout-manager endpoint.
///
/// Only active when such an endpoint is configured; with local timeouts the
/// step falls through to [`HandleDeferredStep`]. Removed entirely for
/// transports with native deferred delivery.
pub struct DeferredMessagesStep {
    timeouts_address: Option<String>,
    transport: Arc<dyn Transport>,
}

impl DeferredMessagesStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "deferred-messages";

    /// Create the step; `timeouts_address` is the external endpoint, when
    /// one is configured
    pub fn new(timeouts_address: Option<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            timeouts_address,
            transport,
        }
    }
}

#[async_trait]
impl IncomingStep for DeferredMessagesStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()> {
        if ctx.message.deferred_until()?.is_none() {
            return next.run(ctx).await;
        }
        let Some(timeouts_address) = &self.timeouts_address else {
            return next.run(ctx).await;
        };

        let mut message = ctx.message.clone();
        if !message.headers.contains_key(headers::DEFERRED_RECIPIENT) {
            let recipient = message.return_address().ok_or_else(|| {
                Error::handler(format!(
                    "deferred message has neither {} nor {}",
                    headers::DEFERRED_RECIPIENT,
                    headers::RETURN_ADDRESS
                ))
            })?;
            let recipient = recipient.to_string();
            message.headers.insert(headers::DEFERRED_RECIPIENT, recipient);
        }

        debug!(
            timeouts_address = %timeouts_address,
            message_id = message.message_id().unwrap_or("<none>"),
            "forwarding deferred message to the timeout manager endpoint"
        );
        self.transport
            .send(timeouts_address, message, &ctx.transaction)
            .await
        // Short-circuit: the message is consumed locally
    }
}

/// Stores deferred messages in the local timeout store.
///
/// The store write is registered on the transaction's commit, so an aborted
/// delivery neither loses nor duplicates the envelope. Removed for
/// transports with native deferred delivery.
pub struct HandleDeferredStep {
    store: Arc<dyn TimeoutStore>,
}

impl HandleDeferredStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "handle-deferred";

    /// Create the step over the local timeout store
    pub fn new(store: Arc<dyn TimeoutStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IncomingStep for HandleDeferredStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()> {
        let Some(due_time) = ctx.message.deferred_until()? else {
            return next.run(ctx).await;
        };

        let mut envelope_headers = ctx.message.headers.clone();
        envelope_headers.remove(headers::DEFERRED_UNTIL);
        let recipient = envelope_headers
            .remove(headers::DEFERRED_RECIPIENT)
            .or_else(|| ctx.message.return_address().map(str::to_owned))
            .ok_or_else(|| {
                Error::handler(format!(
                    "deferred message has neither {} nor {}",
                    headers::DEFERRED_RECIPIENT,
                    headers::RETURN_ADDRESS
                ))
            })?;

        let envelope = DeferredEnvelope {
            approximate_due_time: due_time,
            headers: envelope_headers,
            body: ctx.message.body.clone(),
            recipient,
        };
        debug!(
            due_time = %due_time,
            recipient = %envelope.recipient,
            "storing deferred message"
        );
        let store = self.store.clone();
        ctx.transaction
            .on_commit(move || async move { store.defer(envelope).await })
        // Short-circuit: the message is consumed locally
    }
}
