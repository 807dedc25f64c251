use crate::context::{IncomingContext, OutgoingContext};
use async_trait::async_trait;
use carrier_core::Result;
use std::sync::Arc;

/// One stage of the incoming pipeline.
///
/// A step calls `next.run(ctx)` at most once to continue the chain; not
/// calling it short-circuits, consuming the message.
#[async_trait]
pub trait IncomingStep: Send + Sync {
    /// Stable step name used for positional insertion and removal
    fn name(&self) -> &'static str;

    /// Process the context, optionally continuing with `next`
    async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()>;
}

/// One stage of the outgoing pipeline
#[async_trait]
pub trait OutgoingStep: Send + Sync {
    /// Stable step name used for positional insertion and removal
    fn name(&self) -> &'static str;

    /// Process the context, optionally continuing with `next`
    async fn process(&self, ctx: &mut OutgoingContext, next: OutgoingNext<'_>) -> Result<()>;
}

/// Continuation over the remaining incoming steps
pub struct IncomingNext<'a> {
    steps: &'a [Arc<dyn IncomingStep>],
}

impl<'a> IncomingNext<'a> {
    /// Build a continuation over a step slice
    pub fn new(steps: &'a [Arc<dyn IncomingStep>]) -> Self {
        Self { steps }
    }

    /// Invoke the rest of the chain; a no-op at the tail
    pub async fn run(self, ctx: &mut IncomingContext) -> Result<()> {
        match self.steps.split_first() {
            Some((head, rest)) => head.process(ctx, IncomingNext { steps: rest }).await,
            None => Ok(()),
        }
    }
}

/// Continuation over the remaining outgoing steps
pub struct OutgoingNext<'a> {
    steps: &'a [Arc<dyn OutgoingStep>],
}

impl<'a> OutgoingNext<'a> {
    /// Build a continuation over a step slice
    pub fn new(steps: &'a [Arc<dyn OutgoingStep>]) -> Self {
        Self { steps }
    }

    /// Invoke the rest of the chain; a no-op at the tail
    pub async fn run(self, ctx: &mut OutgoingContext) -> Result<()> {
        match self.steps.split_first() {
            Some((head, rest)) => head.process(ctx, OutgoingNext { steps: rest }).await,
            None => Ok(()),
        }
    }
}
