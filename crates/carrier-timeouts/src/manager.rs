use crate::traits::TimeoutStore;
use carrier_core::{DateTime, Duration, Result, TransactionContext, TransportMessage};
use carrier_transport::Transport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Periodically delivers due deferred messages to their recipients.
///
/// Each delivery runs in its own transaction: the transport send and the
/// store delete are both registered on commit, so an envelope disappears
/// from the store only when its message is on the way.
pub struct TimeoutManager {
    store: Arc<dyn TimeoutStore>,
    transport: Arc<dyn Transport>,
    tick_interval: Duration,
}

impl TimeoutManager {
    /// Create a manager; it does nothing until [`TimeoutManager::start`]
    pub fn new(
        store: Arc<dyn TimeoutStore>,
        transport: Arc<dyn Transport>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            tick_interval,
        }
    }

    /// The store this manager drains
    pub fn store(&self) -> &Arc<dyn TimeoutStore> {
        &self.store
    }

    /// Spawn the tick loop; it runs until the shutdown signal fires
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(interval = ?self.tick_interval, "timeout manager started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.tick_interval) => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(error) = self.deliver_due(chrono::Utc::now()).await {
                    warn!(%error, "timeout tick failed");
                }
            }
            debug!("timeout manager stopped");
        })
    }

    /// Deliver every envelope due at `now`, returning how many were sent.
    ///
    /// A failing envelope is logged and left in the store for the next tick;
    /// it does not block the others.
    pub async fn deliver_due(&self, now: DateTime) -> Result<usize> {
        let due = self.store.due_timeouts(now).await?;
        let mut delivered = 0;
        for timeout in due {
            let ctx = Arc::new(TransactionContext::new());
            let message =
                TransportMessage::new(timeout.envelope.headers.clone(), timeout.envelope.body.clone());
            let recipient = timeout.envelope.recipient.clone();

            let result = async {
                self.transport.send(&recipient, message, &ctx).await?;
                let store = self.store.clone();
                let id = timeout.id;
                ctx.on_commit(move || async move { store.mark_processed(id).await })?;
                ctx.complete().await
            }
            .await;

            match result {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(%error, recipient = %recipient, "deferred delivery failed, will retry next tick");
                    if ctx.state() == carrier_core::ContextState::Fresh {
                        let _ = ctx.abort().await;
                    }
                }
            }
            ctx.dispose().await;
        }
        if delivered > 0 {
            debug!(delivered, "delivered due deferred messages");
        }
        Ok(delivered)
    }
}
