use async_trait::async_trait;
use carrier_core::Result;

/// Subscription storage port: maps topics to subscriber queue addresses.
///
/// A centralized store is shared infrastructure every endpoint can reach, so
/// subscribers mutate it directly. A local store belongs to the publishing
/// endpoint, and subscribers reach it through subscribe/unsubscribe wire
/// commands. Registrations are idempotent either way.
#[async_trait]
pub trait SubscriptionStorage: Send + Sync {
    /// Subscriber addresses currently registered for a topic
    async fn get_subscribers(&self, topic: &str) -> Result<Vec<String>>;

    /// Register a subscriber address for a topic
    async fn register(&self, topic: &str, subscriber_address: &str) -> Result<()>;

    /// Remove a subscriber address from a topic
    async fn unregister(&self, topic: &str, subscriber_address: &str) -> Result<()>;

    /// Whether this store is shared between endpoints
    fn is_centralized(&self) -> bool;
}
