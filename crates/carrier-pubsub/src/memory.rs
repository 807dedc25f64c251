use crate::traits::SubscriptionStorage;
use async_trait::async_trait;
use carrier_core::Result;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// In-memory subscription storage.
///
/// Local by default; [`InMemorySubscriptionStorage::centralized`] builds the
/// shared variant for topologies where every endpoint can reach the same
/// store instance.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStorage {
    subscriptions: RwLock<HashMap<String, BTreeSet<String>>>,
    centralized: bool,
}

impl InMemorySubscriptionStorage {
    /// Create a local store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a centralized store
    pub fn centralized() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            centralized: true,
        }
    }

    /// Number of distinct `(topic, subscriber)` pairs
    pub async fn subscription_count(&self) -> usize {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.values().map(|s| s.len()).sum()
    }
}

#[async_trait]
impl SubscriptionStorage for InMemorySubscriptionStorage {
    async fn get_subscribers(&self, topic: &str) -> Result<Vec<String>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .get(topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn register(&self, topic: &str, subscriber_address: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions
            .entry(topic.to_string())
            .or_default()
            .insert(subscriber_address.to_string());
        Ok(())
    }

    async fn unregister(&self, topic: &str, subscriber_address: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscribers) = subscriptions.get_mut(topic) {
            subscribers.remove(subscriber_address);
            if subscribers.is_empty() {
                subscriptions.remove(topic);
            }
        }
        Ok(())
    }

    fn is_centralized(&self) -> bool {
        self.centralized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_register_and_resolve_subscribers() {
        let fixture = InMemorySubscriptionStorage::new();

        fixture.register("orders.OrderPlaced", "billing").await.unwrap();
        fixture.register("orders.OrderPlaced", "shipping").await.unwrap();

        let actual = fixture.get_subscribers("orders.OrderPlaced").await.unwrap();
        let expected = vec!["billing".to_string(), "shipping".to_string()];
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let fixture = InMemorySubscriptionStorage::new();

        fixture.register("topic", "billing").await.unwrap();
        fixture.register("topic", "billing").await.unwrap();

        assert_eq!(fixture.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe_restores_the_store() {
        let fixture = InMemorySubscriptionStorage::new();

        fixture.register("topic", "billing").await.unwrap();
        fixture.unregister("topic", "billing").await.unwrap();

        assert!(fixture.get_subscribers("topic").await.unwrap().is_empty());
        assert_eq!(fixture.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_unknown_pair_is_a_no_op() {
        let fixture = InMemorySubscriptionStorage::new();
        fixture.unregister("topic", "nobody").await.unwrap();
        assert_eq!(fixture.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_topic_has_no_subscribers() {
        let fixture = InMemorySubscriptionStorage::new();
        let actual = fixture.get_subscribers("missing").await.unwrap();
        assert!(actual.is_empty());
    }

    #[test]
    fn test_centralized_flag() {
        assert!(!InMemorySubscriptionStorage::new().is_centralized());
        assert!(InMemorySubscriptionStorage::centralized().is_centralized());
    }
}
