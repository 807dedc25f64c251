use async_trait::async_trait;
use carrier_core::{DateTime, HeaderMap, Result};
use serde::{Deserialize, Serialize};

/// A deferred message waiting for its due time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEnvelope {
    /// Earliest time the message may be delivered
    pub approximate_due_time: DateTime,
    /// Headers of the original message
    pub headers: HeaderMap,
    /// Body of the original message
    pub body: Vec<u8>,
    /// Queue address the message returns to when due
    pub recipient: String,
}

/// A due envelope handed out by the store.
///
/// The id is passed back to [`TimeoutStore::mark_processed`] once delivery
/// has been secured; until then the envelope stays in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimeout {
    /// Store-assigned identifier of the envelope
    pub id: u64,
    /// The deferred envelope
    pub envelope: DeferredEnvelope,
}

/// Durable store of deferred envelopes, sorted by due time
#[async_trait]
pub trait TimeoutStore: Send + Sync {
    /// Add a deferred envelope
    async fn defer(&self, envelope: DeferredEnvelope) -> Result<()>;

    /// Envelopes due at `now`, earliest first. Envelopes remain stored until
    /// marked processed.
    async fn due_timeouts(&self, now: DateTime) -> Result<Vec<DueTimeout>>;

    /// Remove an envelope after its delivery committed
    async fn mark_processed(&self, id: u64) -> Result<()>;

    /// Number of envelopes currently stored
    async fn pending_count(&self) -> Result<usize>;
}
