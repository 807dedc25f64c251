use crate::data::{ActiveSaga, SagaInstance};
use crate::handler::SagaHandler;
use crate::locks::{bucket_for, lock_id, ExclusiveAccessLock};
use crate::snapshots::SagaSnapshotStorage;
use crate::storage::SagaStorage;
use carrier_core::{headers, Error, HandlerContext, HeaderMap, Json, LogicalMessage, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Mediates saga handler invocations.
///
/// For each message the engine computes the lock set over all participating
/// handlers, acquires the buckets in ascending order (deduplicated, so the
/// scheme cannot deadlock across workers), resolves or initiates the saga
/// instance per handler, and persists the outcome with optimistic
/// concurrency before releasing the locks in reverse order.
pub struct SagaEngine {
    storage: Arc<dyn SagaStorage>,
    snapshots: Option<Arc<dyn SagaSnapshotStorage>>,
    lock: Arc<dyn ExclusiveAccessLock>,
    lock_buckets: usize,
}

impl SagaEngine {
    /// Create an engine without snapshotting
    pub fn new(
        storage: Arc<dyn SagaStorage>,
        lock: Arc<dyn ExclusiveAccessLock>,
        lock_buckets: usize,
    ) -> Self {
        Self {
            storage,
            snapshots: None,
            lock,
            lock_buckets: lock_buckets.max(1),
        }
    }

    /// Enable snapshotting after each persist
    pub fn with_snapshots(mut self, snapshots: Arc<dyn SagaSnapshotStorage>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// The storage this engine persists to
    pub fn storage(&self) -> &Arc<dyn SagaStorage> {
        &self.storage
    }

    /// Run every participating saga handler for a message.
    ///
    /// Returns whether any handler actually ran (a handler is skipped when
    /// no instance correlates and it does not initiate on the message type).
    pub async fn process(
        &self,
        message: &LogicalMessage,
        handlers: &[Arc<dyn SagaHandler>],
        ctx: &HandlerContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        let mut plan = Vec::new();
        for handler in handlers {
            let Some(correlation) = handler.correlation(&message.message_type) else {
                continue;
            };
            let Some(value) = correlation.value_from(message) else {
                return Err(Error::handler(format!(
                    "message '{}' carries no value for correlation property '{}' of saga '{}'",
                    message.message_type,
                    correlation.property(),
                    handler.data_type()
                )));
            };
            plan.push((handler.clone(), correlation, value));
        }
        if plan.is_empty() {
            return Ok(false);
        }

        let buckets = self.lock_set(&plan);
        let held = self.acquire_in_order(&buckets, cancel).await?;

        let result = self.run_plan(message, &plan, ctx).await;

        for bucket in held.iter().rev() {
            self.lock.release(*bucket);
        }
        result
    }

    fn lock_set(
        &self,
        plan: &[(Arc<dyn SagaHandler>, crate::data::CorrelationProperty, Json)],
    ) -> Vec<usize> {
        let mut buckets: Vec<usize> = plan
            .iter()
            .map(|(handler, correlation, value)| {
                let id = lock_id(handler.data_type(), correlation.property(), value);
                bucket_for(&id, self.lock_buckets)
            })
            .collect();
        buckets.sort_unstable();
        buckets.dedup();
        buckets
    }

    async fn acquire_in_order(
        &self,
        buckets: &[usize],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Vec<usize>> {
        let mut held = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if self.lock.acquire(*bucket, cancel).await {
                held.push(*bucket);
            } else {
                for acquired in held.iter().rev() {
                    self.lock.release(*acquired);
                }
                return Err(crate::error::SagaError::LockCancelled.into());
            }
        }
        Ok(held)
    }

    async fn run_plan(
        &self,
        message: &LogicalMessage,
        plan: &[(Arc<dyn SagaHandler>, crate::data::CorrelationProperty, Json)],
        ctx: &HandlerContext,
    ) -> Result<bool> {
        let mut handled = false;
        for (handler, correlation, value) in plan {
            let existing = self
                .storage
                .find(handler.data_type(), correlation.property(), value)
                .await
                .map_err(Error::from)?;

            let mut saga = match existing {
                Some(instance) => ActiveSaga::loaded(instance),
                None if handler.is_initiator(&message.message_type) => {
                    let mut data = handler.initial_data();
                    if let Json::Object(fields) = &mut data {
                        fields
                            .entry(correlation.property().to_string())
                            .or_insert_with(|| value.clone());
                    }
                    ActiveSaga::created(SagaInstance::new(handler.data_type(), data))
                }
                None => {
                    debug!(
                        message_type = %message.message_type,
                        saga = handler.data_type(),
                        property = correlation.property(),
                        "no saga instance correlates and the handler is not an initiator, skipping"
                    );
                    continue;
                }
            };

            handler.handle(&mut saga, message, ctx).await?;
            self.persist(saga, &handler.correlation_properties(), ctx)
                .await?;
            handled = true;
        }
        Ok(handled)
    }

    async fn persist(
        &self,
        saga: ActiveSaga,
        correlation_properties: &[String],
        ctx: &HandlerContext,
    ) -> Result<()> {
        let completed = saga.is_completed();
        let newly_created = saga.is_newly_created();
        let loaded_revision = saga.loaded_revision();
        let mut instance = saga.into_instance();

        if completed {
            if newly_created {
                debug!(saga = %instance.id, "saga completed before its first persist");
                return Ok(());
            }
            self.storage
                .delete(instance.id, loaded_revision)
                .await
                .map_err(Error::from)?;
            return Ok(());
        }

        if newly_created {
            self.storage
                .insert(instance.clone(), correlation_properties)
                .await
                .map_err(Error::from)?;
        } else {
            let new_revision = self
                .storage
                .update(instance.clone(), correlation_properties)
                .await
                .map_err(Error::from)?;
            instance.revision = new_revision;
        }

        if let Some(snapshots) = &self.snapshots {
            if let Err(error) = snapshots.save(&instance, &audit_headers(ctx)).await {
                warn!(saga = %instance.id, %error, "saga snapshot failed");
            }
        }
        Ok(())
    }
}

fn audit_headers(ctx: &HandlerContext) -> HeaderMap {
    let mut audit = HeaderMap::new();
    for key in [headers::MESSAGE_ID, headers::CORRELATION_ID] {
        if let Some(value) = ctx.headers().get(key) {
            audit.insert(key, value);
        }
    }
    audit
}
