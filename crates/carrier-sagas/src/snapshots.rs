use crate::data::SagaInstance;
use crate::error::Result;
use async_trait::async_trait;
use carrier_core::{DateTime, HeaderMap};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An immutable copy of a saga instance taken after a persist
#[derive(Debug, Clone, PartialEq)]
pub struct SagaSnapshot {
    /// The saga instance as persisted
    pub instance: SagaInstance,
    /// Audit metadata: message id, correlation id, handler
    pub audit: HeaderMap,
    /// When the snapshot was taken
    pub taken_at: DateTime,
}

/// Optional snapshot sink, keyed by `(id, revision)`
#[async_trait]
pub trait SagaSnapshotStorage: Send + Sync {
    /// Persist one snapshot
    async fn save(&self, instance: &SagaInstance, audit: &HeaderMap) -> Result<()>;
}

/// In-memory snapshot storage
#[derive(Debug, Default)]
pub struct InMemorySagaSnapshotStorage {
    snapshots: RwLock<HashMap<(Uuid, u64), SagaSnapshot>>,
}

impl InMemorySagaSnapshotStorage {
    /// Create an empty snapshot store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots taken
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Fetch the snapshot of a saga at a revision
    pub async fn get(&self, id: Uuid, revision: u64) -> Option<SagaSnapshot> {
        self.snapshots.read().await.get(&(id, revision)).cloned()
    }
}

#[async_trait]
impl SagaSnapshotStorage for InMemorySagaSnapshotStorage {
    async fn save(&self, instance: &SagaInstance, audit: &HeaderMap) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(
            (instance.id, instance.revision),
            SagaSnapshot {
                instance: instance.clone(),
                audit: audit.clone(),
                taken_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }
}
