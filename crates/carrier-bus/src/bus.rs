use crate::config::BusConfig;
use crate::router::Router;
use async_trait::async_trait;
use carrier_core::{
    headers, BusHandle, Duration, Error, LogicalMessage, Result, TransactionContext,
};
use carrier_pipeline::{OutgoingContext, PipelineInvoker};
use carrier_pubsub::{topic_for_type, SubscribeRequest, SubscriptionStorage, UnsubscribeRequest,
    SUBSCRIBE_REQUEST_TYPE, UNSUBSCRIBE_REQUEST_TYPE};
use carrier_retry::{ErrorTracker, TrackerStats};
use carrier_timeouts::{TimeoutManager, TimeoutStore};
use carrier_transport::Transport;
use carrier_workers::WorkerPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The top-level send/receive facade.
///
/// Owns the worker pool, pipeline, transport, error tracker, timeout
/// manager, subscription storage, and dispatcher. Built by
/// [`crate::BusBuilder`]; inert until [`Bus::start`].
pub struct Bus {
    name: String,
    address: String,
    one_way: bool,
    config: BusConfig,
    transport: Arc<dyn Transport>,
    router: Router,
    invoker: Arc<PipelineInvoker>,
    subscriptions: Arc<dyn SubscriptionStorage>,
    timeout_store: Arc<dyn TimeoutStore>,
    timeout_manager: Option<Arc<TimeoutManager>>,
    tracker: Arc<ErrorTracker>,
    pool: WorkerPool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Bus {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        name: String,
        address: String,
        one_way: bool,
        config: BusConfig,
        transport: Arc<dyn Transport>,
        router: Router,
        invoker: Arc<PipelineInvoker>,
        subscriptions: Arc<dyn SubscriptionStorage>,
        timeout_store: Arc<dyn TimeoutStore>,
        timeout_manager: Option<Arc<TimeoutManager>>,
        tracker: Arc<ErrorTracker>,
        pool: WorkerPool,
        shutdown_tx: watch::Sender<bool>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name,
            address,
            one_way,
            config,
            transport,
            router,
            invoker,
            subscriptions,
            timeout_store,
            timeout_manager,
            tracker,
            pool,
            shutdown_tx,
            shutdown_rx,
            started: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }
    }

    /// The bus's own input-queue address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the bus runs without a receive loop
    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// The pipeline invoker, exposed for configuration-time assertions
    pub fn invoker(&self) -> &Arc<PipelineInvoker> {
        &self.invoker
    }

    /// The subscription storage this bus consults when publishing
    pub fn subscription_storage(&self) -> &Arc<dyn SubscriptionStorage> {
        &self.subscriptions
    }

    /// The timeout store backing local deferral
    pub fn timeout_store(&self) -> &Arc<dyn TimeoutStore> {
        &self.timeout_store
    }

    /// Current error-tracker counters
    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    /// Number of running workers
    pub async fn worker_count(&self) -> usize {
        self.pool.worker_count().await
    }

    /// Create the queues and start the workers and background loops.
    /// Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transport
            .create_queue(&self.config.error_queue_address)
            .await?;
        if !self.one_way {
            self.transport.create_queue(&self.address).await?;
            self.pool
                .set_worker_count(self.config.number_of_workers)
                .await;
        }

        let mut background = self.background.lock().await;
        if let Some(manager) = &self.timeout_manager {
            background.push(manager.clone().start(self.shutdown_rx.clone()));
        }
        background.push(self.spawn_tracker_purge());

        info!(
            bus = %self.name,
            address = %self.address,
            workers = self.config.number_of_workers,
            one_way = self.one_way,
            "bus started"
        );
        Ok(())
    }

    fn spawn_tracker_purge(&self) -> JoinHandle<()> {
        let tracker = self.tracker.clone();
        let interval = self.config.error_purge_interval;
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                let purged = tracker.purge_stale();
                if purged > 0 {
                    debug!(purged, "purged stale error-tracker entries");
                }
            }
        })
    }

    /// Stop the bus: signal shutdown, drain the workers up to the deadline,
    /// and wait for the background loops.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.pool.stop().await;

        let mut background = self.background.lock().await;
        for handle in background.drain(..) {
            if tokio::time::timeout(self.config.shutdown_drain_deadline, handle)
                .await
                .is_err()
            {
                warn!(bus = %self.name, "background task did not stop within the drain deadline");
            }
        }
        info!(bus = %self.name, "bus stopped");
    }

    /// Change the worker count at runtime.
    ///
    /// A one-way client rejects any attempt to raise it; lowering (or
    /// restating) the count remains valid.
    pub async fn set_number_of_workers(&self, workers: usize) -> Result<()> {
        if self.one_way && workers > self.pool.worker_count().await {
            return Err(Error::configuration(
                "a one-way client has no receive loop; the worker count cannot be raised",
            ));
        }
        self.pool.set_worker_count(workers).await;
        Ok(())
    }

    /// Send a message to the destination routed for its type
    pub async fn send(&self, message: LogicalMessage) -> Result<()> {
        let destination = self.router.get_destination(&message.message_type)?.to_string();
        self.outgoing_fresh(vec![destination], message).await
    }

    /// Send a message to an explicit destination address
    pub async fn send_to(&self, destination: &str, message: LogicalMessage) -> Result<()> {
        self.outgoing_fresh(vec![destination.to_string()], message)
            .await
    }

    /// Send a message to this bus's own input queue
    pub async fn send_local(&self, message: LogicalMessage) -> Result<()> {
        if self.one_way {
            return Err(Error::configuration(
                "a one-way client has no input queue to send to",
            ));
        }
        self.outgoing_fresh(vec![self.address.clone()], message)
            .await
    }

    /// Publish a message to every subscriber of its topic
    pub async fn publish(&self, message: LogicalMessage) -> Result<()> {
        let (destinations, message) = self.prepare_publish(message).await?;
        if destinations.is_empty() {
            return Ok(());
        }
        self.outgoing_fresh(destinations, message).await
    }

    /// Defer a message: it returns to this bus's input queue after `delay`
    pub async fn defer(&self, delay: Duration, message: LogicalMessage) -> Result<()> {
        let (destination, message) = self.prepare_defer(delay, message)?;
        self.outgoing_fresh(vec![destination], message).await
    }

    /// Subscribe this bus to the topic derived from a message type
    pub async fn subscribe(&self, message_type: &str) -> Result<()> {
        match self.prepare_subscription(message_type, true)? {
            SubscriptionAction::Direct { topic } => {
                self.subscriptions.register(&topic, &self.address).await
            }
            SubscriptionAction::Request {
                destination,
                message,
            } => self.outgoing_fresh(vec![destination], message).await,
        }
    }

    /// Unsubscribe this bus from the topic derived from a message type
    pub async fn unsubscribe(&self, message_type: &str) -> Result<()> {
        match self.prepare_subscription(message_type, false)? {
            SubscriptionAction::Direct { topic } => {
                self.subscriptions.unregister(&topic, &self.address).await
            }
            SubscriptionAction::Request {
                destination,
                message,
            } => self.outgoing_fresh(vec![destination], message).await,
        }
    }

    // Outgoing operations funnel through the pipeline inside the ambient
    // transaction (handler sends) or a fresh implicit one (API sends).

    async fn outgoing(
        &self,
        destinations: Vec<String>,
        message: LogicalMessage,
        tx: Arc<TransactionContext>,
    ) -> Result<()> {
        let mut ctx = OutgoingContext::new_multi(destinations, message, tx);
        self.invoker.invoke_outgoing(&mut ctx).await
    }

    async fn outgoing_fresh(
        &self,
        destinations: Vec<String>,
        message: LogicalMessage,
    ) -> Result<()> {
        let tx = Arc::new(TransactionContext::new());
        let result = match self.outgoing(destinations, message, tx.clone()).await {
            Ok(()) => tx.complete().await,
            Err(error) => {
                let _ = tx.abort().await;
                Err(error)
            }
        };
        tx.dispose().await;
        result
    }

    async fn prepare_publish(
        &self,
        mut message: LogicalMessage,
    ) -> Result<(Vec<String>, LogicalMessage)> {
        let topic = topic_for_type(&message.message_type);
        let subscribers = self.subscriptions.get_subscribers(&topic).await?;
        message.headers.insert(headers::INTENT, headers::INTENT_PUB_SUB);
        if subscribers.is_empty() {
            debug!(topic = %topic, "publish with no subscribers");
        }
        Ok((subscribers, message))
    }

    fn prepare_defer(
        &self,
        delay: Duration,
        mut message: LogicalMessage,
    ) -> Result<(String, LogicalMessage)> {
        if self.one_way {
            return Err(Error::configuration(
                "a one-way client has no input queue for deferred messages to return to",
            ));
        }
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| Error::configuration(format!("defer delay out of range: {e}")))?;
        let due_time = chrono::Utc::now() + delay;
        message
            .headers
            .insert(headers::DEFERRED_UNTIL, due_time.to_rfc3339());
        message
            .headers
            .insert_if_absent(headers::DEFERRED_RECIPIENT, &self.address);
        let destination = self
            .config
            .timeouts_address
            .clone()
            .unwrap_or_else(|| self.address.clone());
        Ok((destination, message))
    }

    fn prepare_subscription(
        &self,
        message_type: &str,
        subscribe: bool,
    ) -> Result<SubscriptionAction> {
        if self.one_way {
            return Err(Error::configuration(
                "a one-way client has no input queue and cannot subscribe",
            ));
        }
        let topic = topic_for_type(message_type);
        if self.subscriptions.is_centralized() {
            return Ok(SubscriptionAction::Direct { topic });
        }
        let destination = self.router.get_destination(message_type)?.to_string();
        let message = if subscribe {
            LogicalMessage::new(
                SUBSCRIBE_REQUEST_TYPE,
                serde_json::to_value(SubscribeRequest {
                    topic,
                    subscriber_address: self.address.clone(),
                })?,
            )
        } else {
            LogicalMessage::new(
                UNSUBSCRIBE_REQUEST_TYPE,
                serde_json::to_value(UnsubscribeRequest {
                    topic,
                    subscriber_address: self.address.clone(),
                })?,
            )
        };
        Ok(SubscriptionAction::Request {
            destination,
            message,
        })
    }
}

enum SubscriptionAction {
    Direct { topic: String },
    Request {
        destination: String,
        message: LogicalMessage,
    },
}

// The same operations, scoped to a handler's ambient transaction. Sends
// registered here reach the transport only when that transaction commits.
#[async_trait]
impl BusHandle for Bus {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, message: LogicalMessage, tx: Arc<TransactionContext>) -> Result<()> {
        let destination = self.router.get_destination(&message.message_type)?.to_string();
        self.outgoing(vec![destination], message, tx).await
    }

    async fn send_to(
        &self,
        destination: &str,
        message: LogicalMessage,
        tx: Arc<TransactionContext>,
    ) -> Result<()> {
        self.outgoing(vec![destination.to_string()], message, tx)
            .await
    }

    async fn publish(&self, message: LogicalMessage, tx: Arc<TransactionContext>) -> Result<()> {
        let (destinations, message) = self.prepare_publish(message).await?;
        if destinations.is_empty() {
            return Ok(());
        }
        self.outgoing(destinations, message, tx).await
    }

    async fn defer(
        &self,
        delay: Duration,
        message: LogicalMessage,
        tx: Arc<TransactionContext>,
    ) -> Result<()> {
        let (destination, message) = self.prepare_defer(delay, message)?;
        self.outgoing(vec![destination], message, tx).await
    }

    async fn subscribe(&self, message_type: &str, tx: Arc<TransactionContext>) -> Result<()> {
        match self.prepare_subscription(message_type, true)? {
            SubscriptionAction::Direct { topic } => {
                self.subscriptions.register(&topic, &self.address).await
            }
            SubscriptionAction::Request {
                destination,
                message,
            } => self.outgoing(vec![destination], message, tx).await,
        }
    }

    async fn unsubscribe(&self, message_type: &str, tx: Arc<TransactionContext>) -> Result<()> {
        match self.prepare_subscription(message_type, false)? {
            SubscriptionAction::Direct { topic } => {
                self.subscriptions.unregister(&topic, &self.address).await
            }
            SubscriptionAction::Request {
                destination,
                message,
            } => self.outgoing(vec![destination], message, tx).await,
        }
    }
}
