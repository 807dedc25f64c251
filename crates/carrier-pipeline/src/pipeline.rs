use crate::step::{IncomingStep, OutgoingStep};
use carrier_core::{Error, Result};
use std::sync::Arc;

/// Where to place a step relative to the existing chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPosition {
    /// Before every other step
    First,
    /// After every other step
    Last,
    /// Immediately before the named step
    Before(&'static str),
    /// Immediately after the named step
    After(&'static str),
}

/// Ordered incoming and outgoing step chains.
///
/// Mutable while the bus is being assembled; the invoker takes it behind an
/// `Arc` afterwards and the chains never change again.
#[derive(Default)]
pub struct Pipeline {
    incoming: Vec<Arc<dyn IncomingStep>>,
    outgoing: Vec<Arc<dyn OutgoingStep>>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// The incoming step chain
    pub fn incoming(&self) -> &[Arc<dyn IncomingStep>] {
        &self.incoming
    }

    /// The outgoing step chain
    pub fn outgoing(&self) -> &[Arc<dyn OutgoingStep>] {
        &self.outgoing
    }

    /// Names of the incoming steps, in order
    pub fn incoming_names(&self) -> Vec<&'static str> {
        self.incoming.iter().map(|s| s.name()).collect()
    }

    /// Names of the outgoing steps, in order
    pub fn outgoing_names(&self) -> Vec<&'static str> {
        self.outgoing.iter().map(|s| s.name()).collect()
    }

    /// Insert an incoming step at the given position.
    ///
    /// Fails when the anchor step of `Before`/`After` is not present.
    pub fn insert_incoming(
        &mut self,
        step: Arc<dyn IncomingStep>,
        position: StepPosition,
    ) -> Result<()> {
        let index = resolve_position(position, &self.incoming_names())?;
        self.incoming.insert(index, step);
        Ok(())
    }

    /// Insert an outgoing step at the given position
    pub fn insert_outgoing(
        &mut self,
        step: Arc<dyn OutgoingStep>,
        position: StepPosition,
    ) -> Result<()> {
        let index = resolve_position(position, &self.outgoing_names())?;
        self.outgoing.insert(index, step);
        Ok(())
    }

    /// Remove the named incoming step, returning whether it was present
    pub fn remove_incoming(&mut self, name: &str) -> bool {
        let before = self.incoming.len();
        self.incoming.retain(|s| s.name() != name);
        self.incoming.len() != before
    }

    /// Remove the named outgoing step, returning whether it was present
    pub fn remove_outgoing(&mut self, name: &str) -> bool {
        let before = self.outgoing.len();
        self.outgoing.retain(|s| s.name() != name);
        self.outgoing.len() != before
    }
}

fn resolve_position(position: StepPosition, names: &[&'static str]) -> Result<usize> {
    match position {
        StepPosition::First => Ok(0),
        StepPosition::Last => Ok(names.len()),
        StepPosition::Before(anchor) => names
            .iter()
            .position(|n| *n == anchor)
            .ok_or_else(|| anchor_missing(anchor)),
        StepPosition::After(anchor) => names
            .iter()
            .position(|n| *n == anchor)
            .map(|i| i + 1)
            .ok_or_else(|| anchor_missing(anchor)),
    }
}

fn anchor_missing(anchor: &str) -> Error {
    Error::configuration(format!(
        "cannot position step relative to '{anchor}': no such step in the pipeline"
    ))
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("incoming", &self.incoming_names())
            .field("outgoing", &self.outgoing_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::IncomingContext;
    use crate::step::IncomingNext;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct NamedStep(&'static str);

    #[async_trait]
    impl IncomingStep for NamedStep {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()> {
            next.run(ctx).await
        }
    }

    fn fixture_pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline
            .insert_incoming(Arc::new(NamedStep("retry")), StepPosition::Last)
            .unwrap();
        pipeline
            .insert_incoming(Arc::new(NamedStep("deserialize")), StepPosition::Last)
            .unwrap();
        pipeline
            .insert_incoming(Arc::new(NamedStep("dispatch")), StepPosition::Last)
            .unwrap();
        pipeline
    }

    #[test]
    fn test_insert_first_and_last() {
        let mut fixture = fixture_pipeline();
        fixture
            .insert_incoming(Arc::new(NamedStep("audit")), StepPosition::First)
            .unwrap();
        fixture
            .insert_incoming(Arc::new(NamedStep("metrics")), StepPosition::Last)
            .unwrap();

        let actual = fixture.incoming_names();
        let expected = vec!["audit", "retry", "deserialize", "dispatch", "metrics"];
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_insert_before_and_after() {
        let mut fixture = fixture_pipeline();
        fixture
            .insert_incoming(
                Arc::new(NamedStep("decompress")),
                StepPosition::Before("deserialize"),
            )
            .unwrap();
        fixture
            .insert_incoming(
                Arc::new(NamedStep("validate")),
                StepPosition::After("deserialize"),
            )
            .unwrap();

        let actual = fixture.incoming_names();
        let expected = vec!["retry", "decompress", "deserialize", "validate", "dispatch"];
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_insert_with_missing_anchor_fails() {
        let mut fixture = fixture_pipeline();
        let actual = fixture.insert_incoming(
            Arc::new(NamedStep("orphan")),
            StepPosition::Before("no-such-step"),
        );
        assert!(matches!(actual, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_remove_step() {
        let mut fixture = fixture_pipeline();

        assert!(fixture.remove_incoming("deserialize"));
        assert!(!fixture.remove_incoming("deserialize"));

        let actual = fixture.incoming_names();
        let expected = vec!["retry", "dispatch"];
        assert_eq!(actual, expected);
    }
}
