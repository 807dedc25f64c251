use async_trait::async_trait;
use carrier_core::{Result, Serializer};
use carrier_pipeline::{
    IncomingContext, IncomingNext, IncomingStep, OutgoingContext, OutgoingNext, OutgoingStep,
};
use std::sync::Arc;

/// Decodes the received wire message into its logical form
pub struct DeserializeStep {
    serializer: Arc<dyn Serializer>,
}

impl DeserializeStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "deserialize";

    /// Create the step over the configured serializer
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl IncomingStep for DeserializeStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()> {
        ctx.logical = Some(self.serializer.deserialize(&ctx.message).await?);
        next.run(ctx).await
    }
}

/// Collapses the outgoing logical message to its wire form
pub struct SerializeStep {
    serializer: Arc<dyn Serializer>,
}

impl SerializeStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "serialize";

    /// Create the step over the configured serializer
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl OutgoingStep for SerializeStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut OutgoingContext, next: OutgoingNext<'_>) -> Result<()> {
        ctx.wire = Some(self.serializer.serialize(&ctx.logical).await?);
        next.run(ctx).await
    }
}
