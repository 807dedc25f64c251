use crate::data::{canonical_value, SagaInstance};
use crate::error::{Result, SagaError};
use async_trait::async_trait;
use carrier_core::Json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Saga persistence port.
///
/// Implementations enforce two invariants: the revision of a stored saga
/// strictly increases by one per committed update (stale updates fail with
/// [`SagaError::ConcurrencyConflict`]), and a correlation property value
/// belongs to at most one instance per (data type, property) (violations
/// fail with [`SagaError::CorrelationConflict`]).
#[async_trait]
pub trait SagaStorage: Send + Sync {
    /// Find the saga instance whose data carries `value` under `property`.
    ///
    /// The property `"id"` addresses the saga identity itself.
    async fn find(
        &self,
        data_type: &str,
        property: &str,
        value: &Json,
    ) -> Result<Option<SagaInstance>>;

    /// Insert a new instance, indexing the listed correlation properties
    async fn insert(
        &self,
        instance: SagaInstance,
        correlation_properties: &[String],
    ) -> Result<()>;

    /// Update an instance whose stored revision still equals
    /// `instance.revision`; returns the new revision on success.
    async fn update(
        &self,
        instance: SagaInstance,
        correlation_properties: &[String],
    ) -> Result<u64>;

    /// Delete an instance whose stored revision still equals
    /// `loaded_revision`
    async fn delete(&self, id: Uuid, loaded_revision: u64) -> Result<()>;
}

type IndexKey = (String, String, String);

#[derive(Default)]
struct Inner {
    instances: HashMap<Uuid, SagaInstance>,
    index: HashMap<IndexKey, Uuid>,
}

impl Inner {
    fn index_entries(instance: &SagaInstance, correlation_properties: &[String]) -> Vec<IndexKey> {
        correlation_properties
            .iter()
            .filter_map(|property| {
                instance.data.get(property).map(|value| {
                    (
                        instance.data_type.clone(),
                        property.clone(),
                        canonical_value(value),
                    )
                })
            })
            .collect()
    }

    fn check_uniqueness(&self, instance: &SagaInstance, entries: &[IndexKey]) -> Result<()> {
        for key in entries {
            if let Some(owner) = self.index.get(key) {
                if *owner != instance.id {
                    let (data_type, property, value) = key.clone();
                    return Err(SagaError::CorrelationConflict {
                        data_type,
                        property,
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    fn drop_index_entries_for(&mut self, id: Uuid) {
        self.index.retain(|_, owner| *owner != id);
    }
}

/// In-memory saga storage
#[derive(Default)]
pub struct InMemorySagaStorage {
    inner: RwLock<Inner>,
}

impl InMemorySagaStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored saga instances
    pub async fn instance_count(&self) -> usize {
        self.inner.read().await.instances.len()
    }

    /// Fetch an instance by id, for assertions and diagnostics
    pub async fn get(&self, id: Uuid) -> Option<SagaInstance> {
        self.inner.read().await.instances.get(&id).cloned()
    }
}

#[async_trait]
impl SagaStorage for InMemorySagaStorage {
    async fn find(
        &self,
        data_type: &str,
        property: &str,
        value: &Json,
    ) -> Result<Option<SagaInstance>> {
        let inner = self.inner.read().await;
        if property == "id" {
            let id = Uuid::parse_str(&canonical_value(value))
                .map_err(|e| SagaError::storage(format!("invalid saga id: {e}")))?;
            return Ok(inner
                .instances
                .get(&id)
                .filter(|instance| instance.data_type == data_type)
                .cloned());
        }
        let key = (
            data_type.to_string(),
            property.to_string(),
            canonical_value(value),
        );
        let Some(id) = inner.index.get(&key) else {
            return Ok(None);
        };
        Ok(inner.instances.get(id).cloned())
    }

    async fn insert(
        &self,
        instance: SagaInstance,
        correlation_properties: &[String],
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entries = Inner::index_entries(&instance, correlation_properties);
        inner.check_uniqueness(&instance, &entries)?;
        for key in entries {
            inner.index.insert(key, instance.id);
        }
        inner.instances.insert(instance.id, instance);
        Ok(())
    }

    async fn update(
        &self,
        instance: SagaInstance,
        correlation_properties: &[String],
    ) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let stored_revision = match inner.instances.get(&instance.id) {
            Some(stored) => stored.revision,
            None => return Err(SagaError::NotFound { id: instance.id }),
        };
        if stored_revision != instance.revision {
            return Err(SagaError::ConcurrencyConflict {
                id: instance.id,
                expected: instance.revision,
                actual: stored_revision,
            });
        }

        let entries = Inner::index_entries(&instance, correlation_properties);
        inner.check_uniqueness(&instance, &entries)?;

        let new_revision = instance.revision + 1;
        let mut updated = instance;
        updated.revision = new_revision;

        inner.drop_index_entries_for(updated.id);
        for key in entries {
            inner.index.insert(key, updated.id);
        }
        inner.instances.insert(updated.id, updated);
        Ok(new_revision)
    }

    async fn delete(&self, id: Uuid, loaded_revision: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let stored_revision = match inner.instances.get(&id) {
            Some(stored) => stored.revision,
            None => return Err(SagaError::NotFound { id }),
        };
        if stored_revision != loaded_revision {
            return Err(SagaError::ConcurrencyConflict {
                id,
                expected: loaded_revision,
                actual: stored_revision,
            });
        }
        inner.instances.remove(&id);
        inner.drop_index_entries_for(id);
        Ok(())
    }
}
