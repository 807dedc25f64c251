use crate::dispatch::Dispatcher;
use async_trait::async_trait;
use carrier_core::{BusHandle, Error, HandlerContext, Result};
use carrier_pipeline::{IncomingContext, IncomingNext, IncomingStep};
use std::sync::Arc;
use std::sync::OnceLock;

/// Terminal incoming step: builds the handler scope and invokes the
/// dispatcher.
///
/// The bus handle is attached after the bus itself has been assembled (the
/// bus owns the pipeline that owns this step), so the slot is filled exactly
/// once at the end of construction.
pub struct DispatchStep {
    dispatcher: Arc<Dispatcher>,
    bus: OnceLock<Arc<dyn BusHandle>>,
}

impl DispatchStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "dispatch";

    /// Create the step; [`DispatchStep::attach_bus`] must run before the
    /// first message
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            bus: OnceLock::new(),
        }
    }

    /// Attach the bus handle handed to handlers
    pub fn attach_bus(&self, bus: Arc<dyn BusHandle>) -> Result<()> {
        self.bus
            .set(bus)
            .map_err(|_| Error::configuration("a bus is already attached to the dispatch step"))
    }
}

#[async_trait]
impl IncomingStep for DispatchStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()> {
        let logical = ctx.logical.as_ref().ok_or_else(|| {
            Error::configuration("the dispatch step ran before the message was deserialized")
        })?;
        let bus = self
            .bus
            .get()
            .ok_or_else(|| Error::configuration("no bus is attached to the dispatch step"))?
            .clone();

        let handler_ctx = HandlerContext::new(logical.headers.clone(), ctx.transaction.clone(), bus);
        self.dispatcher.dispatch(logical, &handler_ctx).await?;
        next.run(ctx).await
    }
}
