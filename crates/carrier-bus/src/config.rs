use crate::builtin::{SubscribeRequestHandler, UnsubscribeRequestHandler};
use crate::bus::Bus;
use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::router::Router;
use crate::steps::{
    AssignDefaultHeadersStep, DeferredMessagesStep, DeserializeStep, DispatchStep,
    HandleDeferredStep, SendStep, SerializeStep,
};
use carrier_core::{
    BusHandle, Duration, Error, JsonSerializer, MessageHandler, Result, Serializer,
};
use carrier_pipeline::{Pipeline, PipelineInvoker, StepPosition};
use carrier_pubsub::{
    InMemorySubscriptionStorage, SubscriptionStorage, SUBSCRIBE_REQUEST_TYPE,
    UNSUBSCRIBE_REQUEST_TYPE,
};
use carrier_retry::{ErrorTracker, ErrorTrackerConfig, RetryStep};
use carrier_sagas::{
    InMemorySagaStorage, SagaEngine, SagaHandler, SagaSnapshotStorage, SagaStorage,
    SemaphoreExclusiveLock,
};
use carrier_timeouts::{InMemoryTimeoutStore, TimeoutManager, TimeoutStore};
use carrier_transport::Transport;
use carrier_workers::{BackoffStrategy, DefaultBackoffStrategy, WorkerPool, WorkerPoolConfig};
use std::sync::Arc;
use tokio::sync::watch;

/// The recognized bus options
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Worker count; 0 means one-way client mode (no receive loop)
    pub number_of_workers: usize,
    /// In-flight pipeline invocations allowed per worker
    pub max_parallelism_per_worker: u32,
    /// Failure count at which a message is dead-lettered
    pub max_delivery_attempts: u32,
    /// Dead-letter destination
    pub error_queue_address: String,
    /// Saga lock striping
    pub max_lock_buckets: usize,
    /// Timeout-manager poll cadence
    pub timeout_tick_interval: Duration,
    /// Max wait for in-flight messages at stop
    pub shutdown_drain_deadline: Duration,
    /// External timeout-manager endpoint; local timeouts when absent
    pub timeouts_address: Option<String>,
    /// Age after which error-tracker entries are purged
    pub error_entry_max_age: Duration,
    /// Cadence of the error-tracker purge task
    pub error_purge_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            number_of_workers: 1,
            max_parallelism_per_worker: 1,
            max_delivery_attempts: 5,
            error_queue_address: "error".to_string(),
            max_lock_buckets: 1024,
            timeout_tick_interval: Duration::from_secs(1),
            shutdown_drain_deadline: Duration::from_secs(30),
            timeouts_address: None,
            error_entry_max_age: Duration::from_secs(600),
            error_purge_interval: Duration::from_secs(60),
        }
    }
}

type PipelineCustomization = Box<dyn FnOnce(&mut Pipeline) -> Result<()> + Send>;

/// Wires the bus together, enforcing construction order and applying
/// pipeline decorators.
///
/// Everything except the transport has an in-memory default; a missing
/// transport fails the build before anything starts.
pub struct BusBuilder {
    name: String,
    config: BusConfig,
    transport: Option<Arc<dyn Transport>>,
    serializer: Arc<dyn Serializer>,
    router: Router,
    registry: HandlerRegistry,
    subscription_storage: Option<Arc<dyn SubscriptionStorage>>,
    saga_storage: Option<Arc<dyn SagaStorage>>,
    snapshot_storage: Option<Arc<dyn SagaSnapshotStorage>>,
    timeout_store: Option<Arc<dyn TimeoutStore>>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    customizations: Vec<PipelineCustomization>,
}

impl BusBuilder {
    /// Start configuring a bus endpoint with the given name (used in logs)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BusConfig::default(),
            transport: None,
            serializer: Arc::new(JsonSerializer::new()),
            router: Router::new(),
            registry: HandlerRegistry::new(),
            subscription_storage: None,
            saga_storage: None,
            snapshot_storage: None,
            timeout_store: None,
            backoff: None,
            customizations: Vec::new(),
        }
    }

    /// Use the given transport (required)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default JSON serializer
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Map a message type to a destination address
    pub fn route(mut self, message_type: impl Into<String>, destination: impl Into<String>) -> Self {
        self.router.map(message_type, destination);
        self
    }

    /// Register a handler for a message type
    pub fn handle(
        mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.registry.register(message_type, handler);
        self
    }

    /// Register a saga handler for a message type
    pub fn handle_saga(
        mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn SagaHandler>,
    ) -> Self {
        self.registry.register_saga(message_type, handler);
        self
    }

    /// Declare that `message_type` is a kind of `supertype` for dispatch
    pub fn declare_supertype(
        mut self,
        message_type: impl Into<String>,
        supertype: impl Into<String>,
    ) -> Self {
        self.registry.declare_supertype(message_type, supertype);
        self
    }

    /// Replace the default local in-memory subscription storage
    pub fn subscription_storage(mut self, storage: Arc<dyn SubscriptionStorage>) -> Self {
        self.subscription_storage = Some(storage);
        self
    }

    /// Replace the default in-memory saga storage
    pub fn saga_storage(mut self, storage: Arc<dyn SagaStorage>) -> Self {
        self.saga_storage = Some(storage);
        self
    }

    /// Enable saga snapshotting into the given storage
    pub fn snapshot_storage(mut self, storage: Arc<dyn SagaSnapshotStorage>) -> Self {
        self.snapshot_storage = Some(storage);
        self
    }

    /// Replace the default in-memory timeout store
    pub fn timeout_store(mut self, store: Arc<dyn TimeoutStore>) -> Self {
        self.timeout_store = Some(store);
        self
    }

    /// Replace the default backoff strategy
    pub fn backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Add or remove pipeline steps after the defaults are in place
    pub fn customize_pipeline<F>(mut self, customization: F) -> Self
    where
        F: FnOnce(&mut Pipeline) -> Result<()> + Send + 'static,
    {
        self.customizations.push(Box::new(customization));
        self
    }

    /// Set the worker count; 0 selects one-way client mode
    pub fn number_of_workers(mut self, workers: usize) -> Self {
        self.config.number_of_workers = workers;
        self
    }

    /// Set the per-worker parallelism bound
    pub fn max_parallelism_per_worker(mut self, parallelism: u32) -> Self {
        self.config.max_parallelism_per_worker = parallelism;
        self
    }

    /// Set the poison threshold
    pub fn max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.config.max_delivery_attempts = attempts;
        self
    }

    /// Set the dead-letter destination
    pub fn error_queue_address(mut self, address: impl Into<String>) -> Self {
        self.config.error_queue_address = address.into();
        self
    }

    /// Set the saga lock bucket count
    pub fn max_lock_buckets(mut self, buckets: usize) -> Self {
        self.config.max_lock_buckets = buckets;
        self
    }

    /// Set the timeout-manager poll cadence
    pub fn timeout_tick_interval(mut self, interval: Duration) -> Self {
        self.config.timeout_tick_interval = interval;
        self
    }

    /// Set the max wait for in-flight messages at stop
    pub fn shutdown_drain_deadline(mut self, deadline: Duration) -> Self {
        self.config.shutdown_drain_deadline = deadline;
        self
    }

    /// Defer through an external timeout-manager endpoint instead of the
    /// local store
    pub fn timeouts_address(mut self, address: impl Into<String>) -> Self {
        self.config.timeouts_address = Some(address.into());
        self
    }

    /// Replace the whole option set at once
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the bus.
    ///
    /// Fails with a configuration error when the transport is missing or an
    /// option is contradictory; nothing runs until [`Bus::start`].
    pub fn build(mut self) -> Result<Arc<Bus>> {
        let transport = self.transport.take().ok_or_else(|| {
            Error::configuration("a transport must be configured before the bus can be built")
        })?;
        if self.config.max_delivery_attempts == 0 {
            return Err(Error::configuration(
                "max_delivery_attempts must be at least 1",
            ));
        }
        let one_way = self.config.number_of_workers == 0;
        let address = transport.address().to_string();

        let tracker = Arc::new(ErrorTracker::with_config(ErrorTrackerConfig {
            max_delivery_attempts: self.config.max_delivery_attempts,
            entry_max_age: self.config.error_entry_max_age,
        }));
        let subscriptions = self
            .subscription_storage
            .unwrap_or_else(|| Arc::new(InMemorySubscriptionStorage::new()));
        let saga_storage = self
            .saga_storage
            .unwrap_or_else(|| Arc::new(InMemorySagaStorage::new()));
        let timeout_store = self
            .timeout_store
            .unwrap_or_else(|| Arc::new(InMemoryTimeoutStore::new()));
        let backoff = self
            .backoff
            .unwrap_or_else(|| Arc::new(DefaultBackoffStrategy::new()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // The bus answers subscribe/unsubscribe commands from remote
        // endpoints against its local storage
        self.registry.register(
            SUBSCRIBE_REQUEST_TYPE,
            Arc::new(SubscribeRequestHandler::new(subscriptions.clone())),
        );
        self.registry.register(
            UNSUBSCRIBE_REQUEST_TYPE,
            Arc::new(UnsubscribeRequestHandler::new(subscriptions.clone())),
        );

        let mut saga_engine = SagaEngine::new(
            saga_storage,
            Arc::new(SemaphoreExclusiveLock::new(self.config.max_lock_buckets)),
            self.config.max_lock_buckets,
        );
        if let Some(snapshots) = self.snapshot_storage {
            saga_engine = saga_engine.with_snapshots(snapshots);
        }
        let dispatcher = Arc::new(Dispatcher::new(
            self.registry,
            Arc::new(saga_engine),
            shutdown_rx.clone(),
        ));
        let dispatch_step = Arc::new(DispatchStep::new(dispatcher));

        let mut pipeline = Pipeline::new();
        pipeline.insert_incoming(
            Arc::new(RetryStep::new(
                tracker.clone(),
                transport.clone(),
                self.config.error_queue_address.clone(),
            )),
            StepPosition::Last,
        )?;
        pipeline.insert_incoming(
            Arc::new(DeferredMessagesStep::new(
                self.config.timeouts_address.clone(),
                transport.clone(),
            )),
            StepPosition::Last,
        )?;
        pipeline.insert_incoming(
            Arc::new(HandleDeferredStep::new(timeout_store.clone())),
            StepPosition::Last,
        )?;
        pipeline.insert_incoming(
            Arc::new(DeserializeStep::new(self.serializer.clone())),
            StepPosition::Last,
        )?;
        pipeline.insert_incoming(dispatch_step.clone(), StepPosition::Last)?;

        pipeline.insert_outgoing(
            Arc::new(AssignDefaultHeadersStep::new(
                (!one_way).then(|| address.clone()),
            )),
            StepPosition::Last,
        )?;
        pipeline.insert_outgoing(
            Arc::new(SerializeStep::new(self.serializer)),
            StepPosition::Last,
        )?;
        pipeline.insert_outgoing(Arc::new(SendStep::new(transport.clone())), StepPosition::Last)?;

        // Transports with native deferred delivery handle `deferred-until`
        // themselves
        if transport.supports_deferred_delivery() {
            pipeline.remove_incoming(DeferredMessagesStep::NAME);
            pipeline.remove_incoming(HandleDeferredStep::NAME);
        }
        for customization in self.customizations {
            customization(&mut pipeline)?;
        }

        let invoker = Arc::new(PipelineInvoker::new(Arc::new(pipeline)));
        let pool = WorkerPool::new(
            transport.clone(),
            invoker.clone(),
            backoff,
            WorkerPoolConfig {
                max_parallelism_per_worker: self.config.max_parallelism_per_worker.max(1),
                drain_deadline: self.config.shutdown_drain_deadline,
            },
        );

        let timeouts_are_local =
            self.config.timeouts_address.is_none() && !transport.supports_deferred_delivery();
        let timeout_manager = timeouts_are_local.then(|| {
            Arc::new(TimeoutManager::new(
                timeout_store.clone(),
                transport.clone(),
                self.config.timeout_tick_interval,
            ))
        });

        let bus = Arc::new(Bus::assemble(
            self.name,
            address,
            one_way,
            self.config,
            transport,
            self.router,
            invoker,
            subscriptions,
            timeout_store,
            timeout_manager,
            tracker,
            pool,
            shutdown_tx,
            shutdown_rx,
        ));
        let handle: Arc<dyn BusHandle> = bus.clone();
        dispatch_step.attach_bus(handle)?;
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrier_transport::InMemoryNetwork;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_without_transport_fails() {
        let actual = BusBuilder::new("test").build();
        assert!(matches!(actual, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_build_with_zero_delivery_attempts_fails() {
        let network = InMemoryNetwork::new();
        let actual = BusBuilder::new("test")
            .transport(Arc::new(network.create_transport("input")))
            .max_delivery_attempts(0)
            .build();
        assert!(matches!(actual, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_default_pipeline_composition() {
        let network = InMemoryNetwork::new();
        let bus = BusBuilder::new("test")
            .transport(Arc::new(network.create_transport("input")))
            .build()
            .unwrap();

        let pipeline = bus.invoker().pipeline();
        let actual = pipeline.incoming_names();
        let expected = vec![
            "retry",
            "deferred-messages",
            "handle-deferred",
            "deserialize",
            "dispatch",
        ];
        assert_eq!(actual, expected);

        let actual = pipeline.outgoing_names();
        let expected = vec!["assign-default-headers", "serialize", "send"];
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_native_deferred_transport_drops_the_deferral_steps() {
        let network = InMemoryNetwork::new();
        let transport = network
            .create_transport("input")
            .with_native_deferred_delivery(true);
        let bus = BusBuilder::new("test")
            .transport(Arc::new(transport))
            .build()
            .unwrap();

        let actual = bus.invoker().pipeline().incoming_names();
        let expected = vec!["retry", "deserialize", "dispatch"];
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_pipeline_customization_is_applied() {
        struct AuditStep;

        #[async_trait::async_trait]
        impl carrier_pipeline::IncomingStep for AuditStep {
            fn name(&self) -> &'static str {
                "audit"
            }

            async fn process(
                &self,
                ctx: &mut carrier_pipeline::IncomingContext,
                next: carrier_pipeline::IncomingNext<'_>,
            ) -> Result<()> {
                next.run(ctx).await
            }
        }

        let network = InMemoryNetwork::new();
        let bus = BusBuilder::new("test")
            .transport(Arc::new(network.create_transport("input")))
            .customize_pipeline(|pipeline| {
                pipeline.insert_incoming(
                    Arc::new(AuditStep),
                    StepPosition::Before(DeserializeStep::NAME),
                )
            })
            .build()
            .unwrap();

        let actual = bus.invoker().pipeline().incoming_names();
        let expected = vec![
            "retry",
            "deferred-messages",
            "handle-deferred",
            "audit",
            "deserialize",
            "dispatch",
        ];
        assert_eq!(actual, expected);
    }
}
