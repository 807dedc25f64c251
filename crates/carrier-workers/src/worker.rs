use crate::backoff::BackoffStrategy;
use carrier_core::{Duration, TransactionContext};
use carrier_pipeline::{IncomingContext, PipelineInvoker};
use carrier_transport::Transport;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn};

/// A cooperative receive loop.
///
/// One iteration: acquire a parallelism slot, create a transaction context,
/// receive, run the incoming pipeline, then complete or abort and always
/// dispose. Processing runs in a spawned task holding the slot, so the
/// semaphore bounds in-flight pipeline invocations per worker. Unhandled
/// errors are logged; they never end the loop.
pub struct Worker {
    name: String,
    transport: Arc<dyn Transport>,
    invoker: Arc<PipelineInvoker>,
    parallelism: Arc<Semaphore>,
    max_parallelism: u32,
    backoff: Arc<dyn BackoffStrategy>,
    shutdown: watch::Receiver<bool>,
    drain_deadline: Duration,
}

impl Worker {
    /// Create a worker; it does nothing until [`Worker::run`] is awaited
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        invoker: Arc<PipelineInvoker>,
        max_parallelism: u32,
        backoff: Arc<dyn BackoffStrategy>,
        shutdown: watch::Receiver<bool>,
        drain_deadline: Duration,
    ) -> Self {
        let max_parallelism = max_parallelism.max(1);
        Self {
            name: name.into(),
            transport,
            invoker,
            parallelism: Arc::new(Semaphore::new(max_parallelism as usize)),
            max_parallelism,
            backoff,
            shutdown,
            drain_deadline,
        }
    }

    /// Drive the receive loop until shutdown, then drain in-flight messages
    /// up to the drain deadline.
    pub async fn run(mut self) {
        debug!(worker = %self.name, "worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = self.parallelism.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.shutdown.changed() => break,
            };

            let ctx = Arc::new(TransactionContext::new());
            let received = tokio::select! {
                received = self.transport.receive(&ctx) => received,
                _ = self.shutdown.changed() => {
                    if let Err(error) = ctx.abort().await {
                        warn!(worker = %self.name, %error, "abort on shutdown failed");
                    }
                    ctx.dispose().await;
                    drop(permit);
                    break;
                }
            };

            match received {
                Ok(Some(message)) => {
                    self.backoff.reset();
                    let name = self.name.clone();
                    let invoker = self.invoker.clone();
                    tokio::spawn(async move {
                        process_message(&name, &invoker, message, ctx).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    if let Err(error) = ctx.complete().await {
                        warn!(worker = %self.name, %error, "empty-receive commit failed");
                    }
                    ctx.dispose().await;
                    drop(permit);
                    self.backoff.wait_idle(&mut self.shutdown).await;
                }
                Err(error) => {
                    error!(worker = %self.name, %error, "transport receive failed");
                    if let Err(abort_error) = ctx.abort().await {
                        warn!(worker = %self.name, %abort_error, "abort after receive failure failed");
                    }
                    ctx.dispose().await;
                    drop(permit);
                    self.backoff.wait_error(&mut self.shutdown).await;
                }
            }
        }

        self.drain().await;
        debug!(worker = %self.name, "worker stopped");
    }

    // In-flight tasks hold parallelism permits; reacquiring all of them
    // means every spawned message finished.
    async fn drain(&self) {
        let drained = tokio::time::timeout(
            self.drain_deadline,
            self.parallelism.acquire_many(self.max_parallelism),
        )
        .await;
        match drained {
            Ok(Ok(_permits)) => {}
            Ok(Err(_)) => {}
            Err(_) => warn!(
                worker = %self.name,
                deadline = ?self.drain_deadline,
                "drain deadline elapsed with messages still in flight"
            ),
        }
    }
}

async fn process_message(
    worker: &str,
    invoker: &PipelineInvoker,
    message: carrier_core::TransportMessage,
    tx: Arc<TransactionContext>,
) {
    let mut ctx = IncomingContext::new(message, tx.clone());
    match invoker.invoke_incoming(&mut ctx).await {
        Ok(()) => {
            if let Err(error) = tx.complete().await {
                error!(worker, %error, "transaction commit failed");
            }
        }
        Err(error) => {
            warn!(worker, %error, "message processing failed, rolling back");
            if let Err(abort_error) = tx.abort().await {
                error!(worker, %abort_error, "transaction abort failed");
            }
        }
    }
    tx.dispose().await;
}
