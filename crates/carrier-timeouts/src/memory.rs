use crate::traits::{DeferredEnvelope, DueTimeout, TimeoutStore};
use async_trait::async_trait;
use carrier_core::{DateTime, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    // Due-time ordering; the sequence number disambiguates equal due times
    by_due: BTreeMap<(DateTime, u64), DeferredEnvelope>,
    index: HashMap<u64, (DateTime, u64)>,
}

/// In-memory timeout store
#[derive(Default)]
pub struct InMemoryTimeoutStore {
    inner: RwLock<Inner>,
    sequence: AtomicU64,
}

impl InMemoryTimeoutStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeoutStore for InMemoryTimeoutStore {
    async fn defer(&self, envelope: DeferredEnvelope) -> Result<()> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = (envelope.approximate_due_time, id);
        let mut inner = self.inner.write().await;
        inner.index.insert(id, key);
        inner.by_due.insert(key, envelope);
        Ok(())
    }

    async fn due_timeouts(&self, now: DateTime) -> Result<Vec<DueTimeout>> {
        let inner = self.inner.read().await;
        let due = inner
            .by_due
            .iter()
            .take_while(|((due_time, _), _)| *due_time <= now)
            .map(|((_, id), envelope)| DueTimeout {
                id: *id,
                envelope: envelope.clone(),
            })
            .collect();
        Ok(due)
    }

    async fn mark_processed(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(key) = inner.index.remove(&id) {
            inner.by_due.remove(&key);
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.by_due.len())
    }
}
