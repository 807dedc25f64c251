//! In-memory transport: named queues on a shared network object.
//!
//! Several transports can share one [`InMemoryNetwork`], which makes
//! multi-endpoint topologies (publisher + subscribers, timeout endpoints)
//! expressible inside a single process.

use crate::traits::Transport;
use async_trait::async_trait;
use carrier_core::{Result, TransactionContext, TransportMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

type Queue = Arc<Mutex<VecDeque<TransportMessage>>>;

/// Shared set of named in-memory queues
#[derive(Debug, Clone, Default)]
pub struct InMemoryNetwork {
    queues: Arc<RwLock<HashMap<String, Queue>>>,
}

impl InMemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport bound to an input queue on this network
    pub fn create_transport(&self, address: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            network: self.clone(),
            address: address.into(),
            native_deferred: false,
        }
    }

    /// Create the queue for an address. Idempotent.
    pub async fn create_queue(&self, address: &str) {
        let mut queues = self.queues.write().await;
        queues.entry(address.to_string()).or_default();
    }

    async fn queue(&self, address: &str) -> Queue {
        {
            let queues = self.queues.read().await;
            if let Some(queue) = queues.get(address) {
                return queue.clone();
            }
        }
        let mut queues = self.queues.write().await;
        queues.entry(address.to_string()).or_default().clone()
    }

    /// Append a message to a destination queue
    pub async fn deliver(&self, destination: &str, message: TransportMessage) {
        let queue = self.queue(destination).await;
        queue.lock().await.push_back(message);
    }

    /// Put a message back at the head of a queue (abort path)
    pub async fn return_message(&self, address: &str, message: TransportMessage) {
        let queue = self.queue(address).await;
        queue.lock().await.push_front(message);
    }

    /// Remove and return the next eligible message from a queue.
    ///
    /// The highest-`priority` eligible message wins (messages without the
    /// header count as priority 0), FIFO within a priority. When
    /// `honor_deferred` is set, messages whose `deferred-until` lies in the
    /// future stay in the queue.
    pub async fn take(&self, address: &str, honor_deferred: bool) -> Option<TransportMessage> {
        let queue = self.queue(address).await;
        let mut queue = queue.lock().await;
        let now = chrono::Utc::now();
        let mut best: Option<(usize, i64)> = None;
        for (index, message) in queue.iter().enumerate() {
            if honor_deferred {
                // Unparseable deferrals stay eligible and let the pipeline
                // dead-letter the message
                if let Ok(Some(due)) = message.deferred_until() {
                    if due > now {
                        continue;
                    }
                }
            }
            let priority = message.priority().ok().flatten().unwrap_or(0);
            if best.map_or(true, |(_, current)| priority > current) {
                best = Some((index, priority));
            }
        }
        let (position, _) = best?;
        queue.remove(position)
    }

    /// Number of messages currently waiting on a queue
    pub async fn queue_depth(&self, address: &str) -> usize {
        let queue = self.queue(address).await;
        let queue = queue.lock().await;
        queue.len()
    }

    /// Snapshot of the messages currently waiting on a queue
    pub async fn messages(&self, address: &str) -> Vec<TransportMessage> {
        let queue = self.queue(address).await;
        let queue = queue.lock().await;
        queue.iter().cloned().collect()
    }
}

/// Transport bound to one input queue of an [`InMemoryNetwork`]
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    network: InMemoryNetwork,
    address: String,
    native_deferred: bool,
}

impl InMemoryTransport {
    /// The network this transport sends and receives on
    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }

    /// Toggle native `deferred-until` handling: due messages stay invisible
    /// in the queue until their time arrives.
    pub fn with_native_deferred_delivery(mut self, enabled: bool) -> Self {
        self.native_deferred = enabled;
        self
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn create_queue(&self, address: &str) -> Result<()> {
        self.network.create_queue(address).await;
        Ok(())
    }

    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        ctx: &TransactionContext,
    ) -> Result<()> {
        if message.is_express() {
            self.network.deliver(destination, message).await;
            return Ok(());
        }
        let network = self.network.clone();
        let destination = destination.to_string();
        ctx.on_commit(move || async move {
            network.deliver(&destination, message).await;
            Ok(())
        })
    }

    async fn receive(&self, ctx: &TransactionContext) -> Result<Option<TransportMessage>> {
        loop {
            let Some(message) = self.network.take(&self.address, self.native_deferred).await
            else {
                return Ok(None);
            };

            if message.is_expired(chrono::Utc::now()) {
                debug!(
                    queue = %self.address,
                    message_id = message.message_id().unwrap_or("<none>"),
                    "discarding message past its time-to-be-received"
                );
                continue;
            }

            let network = self.network.clone();
            let address = self.address.clone();
            let returned = message.clone();
            ctx.on_aborted(move || async move {
                network.return_message(&address, returned).await;
                Ok(())
            })?;
            return Ok(Some(message));
        }
    }

    fn supports_deferred_delivery(&self) -> bool {
        self.native_deferred
    }
}
