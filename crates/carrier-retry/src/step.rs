use crate::tracker::ErrorTracker;
use async_trait::async_trait;
use carrier_core::{headers, Result};
use carrier_pipeline::{IncomingContext, IncomingNext, IncomingStep};
use carrier_transport::Transport;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Upper bound on the `error-details` header attached to dead-lettered
/// messages
const MAX_ERROR_DETAILS_LEN: usize = 16 * 1024;

/// First step of the incoming pipeline: tracks downstream failures and
/// dead-letters poison messages.
///
/// Below the poison threshold a failure propagates so the worker aborts the
/// transaction and the transport redelivers. At the threshold the message is
/// copied to the error queue inside the same transaction and the step
/// returns `Ok`, so the commit acknowledges the original exactly once.
pub struct RetryStep {
    tracker: Arc<ErrorTracker>,
    transport: Arc<dyn Transport>,
    error_queue_address: String,
}

impl RetryStep {
    /// Step name for pipeline positioning
    pub const NAME: &'static str = "retry";

    /// Create the retry step
    pub fn new(
        tracker: Arc<ErrorTracker>,
        transport: Arc<dyn Transport>,
        error_queue_address: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            transport,
            error_queue_address: error_queue_address.into(),
        }
    }

    async fn dead_letter(&self, ctx: &IncomingContext, details: String) -> Result<()> {
        let mut message = ctx.message.clone();
        let details = cap_error_details(&details);
        message.headers.insert(headers::ERROR_DETAILS, details);
        message
            .headers
            .insert(headers::SOURCE_QUEUE, self.transport.address());
        self.transport
            .send(&self.error_queue_address, message, &ctx.transaction)
            .await
    }
}

#[async_trait]
impl IncomingStep for RetryStep {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn process(&self, ctx: &mut IncomingContext, next: IncomingNext<'_>) -> Result<()> {
        let Some(message_id) = ctx.message.message_id().map(str::to_owned) else {
            // Nothing to track retries against; one attempt is all it gets
            warn!(
                queue = self.transport.address(),
                "received message without a message-id header, dead-lettering"
            );
            return self
                .dead_letter(ctx, "message has no message-id header".to_string())
                .await;
        };

        match next.run(ctx).await {
            Ok(()) => {
                self.tracker.clear(&message_id);
                Ok(())
            }
            Err(failure) => {
                self.tracker.register_error(&message_id, &failure);
                let attempts = self.tracker.attempt_count(&message_id);

                if self.tracker.has_failed_too_many_times(&message_id) {
                    error!(
                        message_id = %message_id,
                        attempts,
                        error_queue = %self.error_queue_address,
                        "message is poison, moving it to the error queue"
                    );
                    let details = self.tracker.error_descriptions(&message_id).join("\n\n");
                    self.dead_letter(ctx, details).await?;
                    self.tracker.clear(&message_id);
                    Ok(())
                } else {
                    debug!(
                        message_id = %message_id,
                        attempts,
                        %failure,
                        "message handling failed, transport will redeliver"
                    );
                    Err(failure)
                }
            }
        }
    }
}

fn cap_error_details(details: &str) -> String {
    if details.len() <= MAX_ERROR_DETAILS_LEN {
        return details.to_string();
    }
    let mut end = MAX_ERROR_DETAILS_LEN;
    while !details.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} (truncated)", &details[..end])
}
