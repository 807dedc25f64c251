//! Exclusive-access lock with a fixed bucket count.
//!
//! Lock ids are hashed into buckets; acquiring buckets in ascending order
//! across workers makes the scheme deadlock-free. The bucket count trades
//! false sharing against memory.

use crate::data::canonical_value;
use async_trait::async_trait;
use carrier_core::Json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{watch, Semaphore};

/// Keyed lock port guarding saga instances
#[async_trait]
pub trait ExclusiveAccessLock: Send + Sync {
    /// Block cooperatively until the bucket is held. Returns `false` only
    /// when cancelled by the shutdown signal.
    async fn acquire(&self, bucket: usize, cancel: &mut watch::Receiver<bool>) -> bool;

    /// Release a bucket acquired earlier
    fn release(&self, bucket: usize);
}

/// Build the lock id for one correlation lookup
pub fn lock_id(data_type: &str, property: &str, value: &Json) -> String {
    format!("{data_type}:{property}:{}", canonical_value(value))
}

/// Map a lock id to its bucket: `|hash(lock_id)| mod bucket_count`
pub fn bucket_for(lock_id: &str, bucket_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    lock_id.hash(&mut hasher);
    (hasher.finish() % bucket_count.max(1) as u64) as usize
}

/// In-process implementation: a fixed array of binary semaphores
pub struct SemaphoreExclusiveLock {
    buckets: Vec<Semaphore>,
}

impl SemaphoreExclusiveLock {
    /// Create a lock with the given bucket count
    pub fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count.max(1)).map(|_| Semaphore::new(1)).collect(),
        }
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl ExclusiveAccessLock for SemaphoreExclusiveLock {
    async fn acquire(&self, bucket: usize, cancel: &mut watch::Receiver<bool>) -> bool {
        let semaphore = &self.buckets[bucket % self.buckets.len()];
        if *cancel.borrow() {
            return false;
        }
        tokio::select! {
            permit = semaphore.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
            _ = cancel.changed() => false,
        }
    }

    fn release(&self, bucket: usize) {
        self.buckets[bucket % self.buckets.len()].add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_lock_id_format() {
        let actual = lock_id("OrderSaga", "order_id", &json!("o-7"));
        let expected = "OrderSaga:order_id:o-7";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_bucket_is_stable_and_in_range() {
        let id = lock_id("OrderSaga", "order_id", &json!("o-7"));

        let first = bucket_for(&id, 1024);
        let second = bucket_for(&id, 1024);

        assert_eq!(first, second);
        assert!(first < 1024);
    }

    #[test]
    fn test_bucket_count_of_zero_is_clamped() {
        assert_eq!(bucket_for("anything", 0), 0);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let fixture = SemaphoreExclusiveLock::new(8);
        let (_tx, mut cancel) = watch::channel(false);

        assert!(fixture.acquire(3, &mut cancel).await);
        fixture.release(3);
        assert!(fixture.acquire(3, &mut cancel).await);
        fixture.release(3);
    }

    #[tokio::test]
    async fn test_contended_bucket_blocks_until_released() {
        let fixture = Arc::new(SemaphoreExclusiveLock::new(4));
        let (_tx, mut cancel) = watch::channel(false);
        assert!(fixture.acquire(1, &mut cancel).await);

        let contender = {
            let lock = fixture.clone();
            let (_tx2, mut cancel2) = watch::channel(false);
            tokio::spawn(async move {
                let held = lock.acquire(1, &mut cancel2).await;
                lock.release(1);
                (held, _tx2)
            })
        };

        // The contender cannot finish while the bucket is held
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        fixture.release(1);
        let (held, _tx2) = contender.await.unwrap();
        assert!(held);
    }

    #[tokio::test]
    async fn test_cancellation_returns_false() {
        let fixture = Arc::new(SemaphoreExclusiveLock::new(4));
        let (tx, mut cancel) = watch::channel(false);
        assert!(fixture.acquire(2, &mut cancel).await);

        let contender = {
            let lock = fixture.clone();
            let mut cancel = cancel.clone();
            tokio::spawn(async move { lock.acquire(2, &mut cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let actual = contender.await.unwrap();
        assert!(!actual);
        fixture.release(2);
    }

    #[tokio::test]
    async fn test_distinct_buckets_do_not_contend() {
        let fixture = SemaphoreExclusiveLock::new(4);
        let (_tx, mut cancel) = watch::channel(false);

        assert!(fixture.acquire(0, &mut cancel).await);
        assert!(fixture.acquire(1, &mut cancel).await);
        fixture.release(0);
        fixture.release(1);
    }
}
