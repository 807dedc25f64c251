use carrier_core::{Error, HandlerContext, LogicalMessage, MessageHandler, Result};
use carrier_sagas::{SagaEngine, SagaHandler};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Handler registrations keyed by logical type name, plus declared
/// supertype edges.
///
/// Rust has no runtime type hierarchy to walk, so supertypes ("base types
/// and interfaces") are registered explicitly: `declare_supertype("orders.
/// OrderPlaced", "orders.OrderEvent")` makes handlers of `orders.OrderEvent`
/// receive `orders.OrderPlaced` messages too.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
    saga_handlers: HashMap<String, Vec<Arc<dyn SagaHandler>>>,
    supertypes: HashMap<String, Vec<String>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type
    pub fn register(&mut self, message_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .entry(message_type.into())
            .or_default()
            .push(handler);
    }

    /// Register a saga handler for a message type
    pub fn register_saga(
        &mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn SagaHandler>,
    ) {
        self.saga_handlers
            .entry(message_type.into())
            .or_default()
            .push(handler);
    }

    /// Declare that `message_type` is a kind of `supertype`
    pub fn declare_supertype(
        &mut self,
        message_type: impl Into<String>,
        supertype: impl Into<String>,
    ) {
        self.supertypes
            .entry(message_type.into())
            .or_default()
            .push(supertype.into());
    }

    /// Handler lookup order for a runtime type: the type itself, then its
    /// declared supertypes depth-first in declaration order.
    pub fn resolution_order(&self, message_type: &str) -> Vec<String> {
        let mut order = Vec::new();
        self.visit(message_type, &mut order);
        order
    }

    fn visit(&self, message_type: &str, order: &mut Vec<String>) {
        if order.iter().any(|t| t == message_type) {
            return;
        }
        order.push(message_type.to_string());
        if let Some(parents) = self.supertypes.get(message_type) {
            for parent in parents {
                self.visit(parent, order);
            }
        }
    }

    /// Handlers registered directly for a type
    pub fn handlers_for(&self, message_type: &str) -> &[Arc<dyn MessageHandler>] {
        self.handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Saga handlers registered directly for a type
    pub fn saga_handlers_for(&self, message_type: &str) -> &[Arc<dyn SagaHandler>] {
        self.saga_handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Resolves and invokes the handlers for each incoming message.
///
/// Plain handlers run sequentially in resolution order within the shared
/// transaction context; the first error aborts the set. Saga handlers are
/// handed to the saga engine afterwards. A message no handler accepts fails
/// the delivery, so it retries and eventually dead-letters where an operator
/// can see it.
pub struct Dispatcher {
    registry: HandlerRegistry,
    saga_engine: Arc<SagaEngine>,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        registry: HandlerRegistry,
        saga_engine: Arc<SagaEngine>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            saga_engine,
            shutdown,
        }
    }

    /// Invoke every handler for the message
    pub async fn dispatch(&self, message: &LogicalMessage, ctx: &HandlerContext) -> Result<()> {
        let types = self.registry.resolution_order(&message.message_type);
        let mut dispatched = false;

        for message_type in &types {
            for handler in self.registry.handlers_for(message_type) {
                handler.handle(message, ctx).await?;
                dispatched = true;
            }
        }

        let saga_handlers: Vec<Arc<dyn SagaHandler>> = types
            .iter()
            .flat_map(|t| self.registry.saga_handlers_for(t).iter().cloned())
            .collect();
        if !saga_handlers.is_empty() {
            let mut cancel = self.shutdown.clone();
            dispatched |= self
                .saga_engine
                .process(message, &saga_handlers, ctx, &mut cancel)
                .await?;
        }

        if !dispatched {
            return Err(Error::handler(format!(
                "no handlers registered for message type '{}'",
                message.message_type
            )));
        }
        debug!(message_type = %message.message_type, "message dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use carrier_core::{BusHandle, Duration, HeaderMap, TransactionContext};
    use carrier_sagas::{InMemorySagaStorage, SemaphoreExclusiveLock};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    struct NullBus;

    #[async_trait]
    impl BusHandle for NullBus {
        fn address(&self) -> &str {
            "test"
        }
        async fn send(&self, _m: LogicalMessage, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
        async fn send_to(
            &self,
            _d: &str,
            _m: LogicalMessage,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            Ok(())
        }
        async fn publish(&self, _m: LogicalMessage, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
        async fn defer(
            &self,
            _delay: Duration,
            _m: LogicalMessage,
            _tx: Arc<TransactionContext>,
        ) -> Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _t: &str, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _t: &str, _tx: Arc<TransactionContext>) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingHandler {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, _message: &LogicalMessage, _ctx: &HandlerContext) -> Result<()> {
            self.log.lock().unwrap().push(self.label);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _message: &LogicalMessage, _ctx: &HandlerContext) -> Result<()> {
            Err(Error::handler("boom"))
        }
    }

    fn fixture_ctx() -> HandlerContext {
        HandlerContext::new(
            HeaderMap::new(),
            Arc::new(TransactionContext::new()),
            Arc::new(NullBus),
        )
    }

    fn fixture_engine() -> Arc<SagaEngine> {
        Arc::new(SagaEngine::new(
            Arc::new(InMemorySagaStorage::new()),
            Arc::new(SemaphoreExclusiveLock::new(16)),
            16,
        ))
    }

    fn dispatcher(registry: HandlerRegistry) -> (Dispatcher, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (Dispatcher::new(registry, fixture_engine(), rx), tx)
    }

    #[test]
    fn test_resolution_order_is_runtime_type_then_supertypes() {
        let mut registry = HandlerRegistry::new();
        registry.declare_supertype("orders.OrderPlaced", "orders.OrderEvent");
        registry.declare_supertype("orders.OrderEvent", "events.Event");

        let actual = registry.resolution_order("orders.OrderPlaced");
        let expected = vec![
            "orders.OrderPlaced".to_string(),
            "orders.OrderEvent".to_string(),
            "events.Event".to_string(),
        ];
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_resolution_order_handles_diamonds() {
        let mut registry = HandlerRegistry::new();
        registry.declare_supertype("C", "A");
        registry.declare_supertype("C", "B");
        registry.declare_supertype("A", "Root");
        registry.declare_supertype("B", "Root");

        let actual = registry.resolution_order("C");
        let expected = vec![
            "C".to_string(),
            "A".to_string(),
            "Root".to_string(),
            "B".to_string(),
        ];
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_handlers_run_for_type_and_supertypes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.declare_supertype("orders.OrderPlaced", "orders.OrderEvent");
        registry.register(
            "orders.OrderEvent",
            Arc::new(RecordingHandler {
                label: "base",
                log: log.clone(),
            }),
        );
        registry.register(
            "orders.OrderPlaced",
            Arc::new(RecordingHandler {
                label: "derived",
                log: log.clone(),
            }),
        );

        let message = LogicalMessage::new("orders.OrderPlaced", json!({}));
        let (dispatcher, _shutdown) = dispatcher(registry);
        dispatcher.dispatch(&message, &fixture_ctx()).await.unwrap();

        let actual = log.lock().unwrap().clone();
        let expected = vec!["derived", "base"];
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_handler_error_aborts_the_set() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register("Hello", Arc::new(FailingHandler));
        registry.register(
            "Hello",
            Arc::new(RecordingHandler {
                label: "second",
                log: log.clone(),
            }),
        );

        let message = LogicalMessage::new("Hello", json!({}));
        let (dispatcher, _shutdown) = dispatcher(registry);
        let actual = dispatcher.dispatch(&message, &fixture_ctx()).await;

        assert!(matches!(actual, Err(Error::Handler { .. })));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unhandled_message_type_fails() {
        let registry = HandlerRegistry::new();
        let message = LogicalMessage::new("Unknown", json!({}));

        let (dispatcher, _shutdown) = dispatcher(registry);
        let actual = dispatcher.dispatch(&message, &fixture_ctx()).await;

        assert!(matches!(actual, Err(Error::Handler { .. })));
    }
}
