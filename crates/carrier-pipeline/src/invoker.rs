use crate::context::{IncomingContext, OutgoingContext};
use crate::pipeline::Pipeline;
use crate::step::{IncomingNext, OutgoingNext};
use carrier_core::Result;
use std::sync::Arc;

/// Threads a context through a pipeline's step chains.
///
/// The chains are materialized once when the invoker is built and reused for
/// every invocation.
#[derive(Debug, Clone)]
pub struct PipelineInvoker {
    pipeline: Arc<Pipeline>,
}

impl PipelineInvoker {
    /// Create an invoker over a finished pipeline
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// The pipeline this invoker runs
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run the incoming step chain over a received message
    pub async fn invoke_incoming(&self, ctx: &mut IncomingContext) -> Result<()> {
        IncomingNext::new(self.pipeline.incoming()).run(ctx).await
    }

    /// Run the outgoing step chain over a send
    pub async fn invoke_outgoing(&self, ctx: &mut OutgoingContext) -> Result<()> {
        OutgoingNext::new(self.pipeline.outgoing()).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepPosition;
    use crate::step::IncomingStep;
    use async_trait::async_trait;
    use carrier_core::{Error, HeaderMap, TransactionContext, TransportMessage};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct TraceStep {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
        fail: bool,
    }

    impl TraceStep {
        fn new(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                label,
                log,
                short_circuit: false,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl IncomingStep for TraceStep {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:enter", self.label));
            if self.fail {
                return Err(Error::handler(format!("{} failed", self.label)));
            }
            if self.short_circuit {
                return Ok(());
            }
            let result = next.run(ctx).await;
            if result.is_ok() {
                self.log.lock().unwrap().push(format!("{}:exit", self.label));
            }
            result
        }
    }

    fn fixture_context() -> IncomingContext {
        IncomingContext::new(
            TransportMessage::new(HeaderMap::new(), Vec::new()),
            Arc::new(TransactionContext::new()),
        )
    }

    fn build_invoker(steps: Vec<TraceStep>) -> PipelineInvoker {
        let mut pipeline = Pipeline::new();
        for step in steps {
            pipeline
                .insert_incoming(Arc::new(step), StepPosition::Last)
                .unwrap();
        }
        PipelineInvoker::new(Arc::new(pipeline))
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_unwind_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = build_invoker(vec![
            TraceStep::new("outer", log.clone()),
            TraceStep::new("inner", log.clone()),
        ]);

        invoker.invoke_incoming(&mut fixture_context()).await.unwrap();

        let actual = log.lock().unwrap().clone();
        let expected = vec!["outer:enter", "inner:enter", "inner:exit", "outer:exit"];
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_downstream_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut gate = TraceStep::new("gate", log.clone());
        gate.short_circuit = true;
        let invoker = build_invoker(vec![gate, TraceStep::new("downstream", log.clone())]);

        invoker.invoke_incoming(&mut fixture_context()).await.unwrap();

        let actual = log.lock().unwrap().clone();
        let expected = vec!["gate:enter"];
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_step_error_propagates_to_the_caller() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = TraceStep::new("failing", log.clone());
        failing.fail = true;
        let invoker = build_invoker(vec![TraceStep::new("outer", log.clone()), failing]);

        let actual = invoker.invoke_incoming(&mut fixture_context()).await;

        assert!(matches!(actual, Err(Error::Handler { .. })));
        // The outer step saw the error on the way out and did not log an exit
        let observed = log.lock().unwrap().clone();
        assert_eq!(observed, vec!["outer:enter", "failing:enter"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_a_no_op() {
        let invoker = PipelineInvoker::new(Arc::new(Pipeline::new()));
        let actual = invoker.invoke_incoming(&mut fixture_context()).await;
        assert!(actual.is_ok());
    }
}
