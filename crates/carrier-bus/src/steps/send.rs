use async_trait::async_trait;
use carrier_core::{headers, Error, Result};
use carrier_pipeline::{OutgoingContext, OutgoingNext, OutgoingStep};
use carrier_transport::Transport;
use std::sync::Arc;
use tracing::warn;

/// Terminal outgoing step: hands the wire message to the transport for
/// every destination, inside the transaction the send rides on.
///
/// A publish tolerates individual subscriber failures: they are logged, and
/// the operation fails only when every destination failed.
pub struct SendStep {
    transport: Arc<dyn Transport>,
}

impl SendStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "send";

    /// Create the step over the bus transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl OutgoingStep for SendStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut OutgoingContext, _next: OutgoingNext<'_>) -> Result<()> {
        let wire = ctx.wire.as_ref().ok_or_else(|| {
            Error::configuration("the send step ran before the message was serialized")
        })?;
        let is_publish = wire.headers.get(headers::INTENT) == Some(headers::INTENT_PUB_SUB);

        let mut failures = Vec::new();
        for destination in &ctx.destinations {
            if let Err(error) = self
                .transport
                .send(destination, wire.clone(), &ctx.transaction)
                .await
            {
                if is_publish {
                    warn!(
                        destination = %destination,
                        %error,
                        "publish to one subscriber failed"
                    );
                    failures.push(error);
                } else {
                    return Err(error);
                }
            }
        }

        if is_publish && !failures.is_empty() && failures.len() == ctx.destinations.len() {
            return Err(failures.remove(0));
        }
        Ok(())
    }
}
