use async_trait::async_trait;
use carrier_core::{generate_message_id, headers, Result};
use carrier_pipeline::{OutgoingContext, OutgoingNext, OutgoingStep};

/// Stamps the headers every outgoing message must carry: `message-id`,
/// `sent-time`, `intent`, and (for receiving endpoints) `return-address`.
/// Existing values are never overwritten.
pub struct AssignDefaultHeadersStep {
    return_address: Option<String>,
}

impl AssignDefaultHeadersStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "assign-default-headers";

    /// Create the step. One-way clients pass `None`: they have no input
    /// queue to be replied to.
    pub fn new(return_address: Option<String>) -> Self {
        Self { return_address }
    }
}

#[async_trait]
impl OutgoingStep for AssignDefaultHeadersStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut OutgoingContext, next: OutgoingNext<'_>) -> Result<()> {
        let message_headers = &mut ctx.logical.headers;
        message_headers.insert_if_absent(headers::MESSAGE_ID, generate_message_id().as_str());
        message_headers.insert_if_absent(headers::SENT_TIME, chrono::Utc::now().to_rfc3339());
        message_headers.insert_if_absent(headers::INTENT, headers::INTENT_P2P);
        if let Some(return_address) = &self.return_address {
            message_headers.insert_if_absent(headers::RETURN_ADDRESS, return_address);
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrier_core::{LogicalMessage, TransactionContext};
    use carrier_pipeline::{Pipeline, PipelineInvoker, StepPosition};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    async fn run_step(step: AssignDefaultHeadersStep, message: LogicalMessage) -> OutgoingContext {
        let mut pipeline = Pipeline::new();
        pipeline
            .insert_outgoing(Arc::new(step), StepPosition::Last)
            .unwrap();
        let invoker = PipelineInvoker::new(Arc::new(pipeline));
        let mut ctx =
            OutgoingContext::new("dest", message, Arc::new(TransactionContext::new()));
        invoker.invoke_outgoing(&mut ctx).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_default_headers_are_stamped() {
        let step = AssignDefaultHeadersStep::new(Some("input".to_string()));
        let ctx = run_step(step, LogicalMessage::new("Hello", json!("hi"))).await;

        let actual = &ctx.logical.headers;
        assert!(actual.contains_key(headers::MESSAGE_ID));
        assert!(actual.contains_key(headers::SENT_TIME));
        assert_eq!(actual.get(headers::INTENT), Some(headers::INTENT_P2P));
        assert_eq!(actual.get(headers::RETURN_ADDRESS), Some("input"));
    }

    #[tokio::test]
    async fn test_existing_headers_are_preserved() {
        let step = AssignDefaultHeadersStep::new(Some("input".to_string()));
        let message = LogicalMessage::new("Hello", json!("hi"))
            .with_header(headers::MESSAGE_ID, "m-fixed")
            .with_header(headers::INTENT, headers::INTENT_PUB_SUB);
        let ctx = run_step(step, message).await;

        let actual = &ctx.logical.headers;
        assert_eq!(actual.get(headers::MESSAGE_ID), Some("m-fixed"));
        assert_eq!(actual.get(headers::INTENT), Some(headers::INTENT_PUB_SUB));
    }

    #[tokio::test]
    async fn test_one_way_client_gets_no_return_address() {
        let step = AssignDefaultHeadersStep::new(None);
        let ctx = run_step(step, LogicalMessage::new("Hello", json!("hi"))).await;

        assert!(!ctx.logical.headers.contains_key(headers::RETURN_ADDRESS));
    }
}
