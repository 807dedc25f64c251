//! # carrier-workers
//!
//! The worker pool of the Carrier service bus.
//!
//! Each worker is a cooperative loop driving one receive → pipeline →
//! commit cycle at a time, bounded by a per-worker parallelism semaphore.
//! An idle or failing transport is polled through a backoff strategy, and
//! shutdown drains in-flight messages up to a deadline.

pub mod backoff;
pub mod pool;
pub mod worker;

pub use backoff::{BackoffStrategy, DefaultBackoffStrategy};
pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig};
pub use worker::Worker;
