use crate::backoff::BackoffStrategy;
use crate::worker::Worker;
use carrier_core::Duration;
use carrier_pipeline::PipelineInvoker;
use carrier_transport::Transport;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// In-flight pipeline invocations allowed per worker
    pub max_parallelism_per_worker: u32,
    /// How long `stop` waits for in-flight messages
    pub drain_deadline: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_parallelism_per_worker: 1,
            drain_deadline: Duration::from_secs(30),
        }
    }
}

struct WorkerHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Fixed-count set of workers sharing one transport and pipeline.
///
/// Workers can be added and removed while the bus runs; each has its own
/// shutdown signal so removal stops exactly one loop.
pub struct WorkerPool {
    transport: Arc<dyn Transport>,
    invoker: Arc<PipelineInvoker>,
    backoff: Arc<dyn BackoffStrategy>,
    config: WorkerPoolConfig,
    workers: Mutex<Vec<WorkerHandle>>,
    next_worker_number: AtomicUsize,
}

impl WorkerPool {
    /// Create an empty pool
    pub fn new(
        transport: Arc<dyn Transport>,
        invoker: Arc<PipelineInvoker>,
        backoff: Arc<dyn BackoffStrategy>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            transport,
            invoker,
            backoff,
            config,
            workers: Mutex::new(Vec::new()),
            next_worker_number: AtomicUsize::new(1),
        }
    }

    /// Number of running workers
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Grow or shrink the pool to the requested worker count
    pub async fn set_worker_count(&self, desired: usize) {
        let mut workers = self.workers.lock().await;
        while workers.len() < desired {
            let number = self.next_worker_number.fetch_add(1, Ordering::Relaxed);
            let name = format!("carrier-worker-{number}");
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let worker = Worker::new(
                name.clone(),
                self.transport.clone(),
                self.invoker.clone(),
                self.config.max_parallelism_per_worker,
                self.backoff.clone(),
                shutdown_rx,
                self.config.drain_deadline,
            );
            let join = tokio::spawn(worker.run());
            info!(worker = %name, "worker added");
            workers.push(WorkerHandle {
                name,
                shutdown: shutdown_tx,
                join,
            });
        }
        while workers.len() > desired {
            if let Some(handle) = workers.pop() {
                info!(worker = %handle.name, "worker removed");
                let _ = handle.shutdown.send(true);
                join_with_deadline(handle, self.config.drain_deadline).await;
            }
        }
    }

    /// Stop every worker, waiting up to the drain deadline for each
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        for handle in workers.iter() {
            let _ = handle.shutdown.send(true);
        }
        for handle in workers.drain(..) {
            join_with_deadline(handle, self.config.drain_deadline).await;
        }
    }

    /// Current pool counters
    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.worker_count().await,
            max_parallelism_per_worker: self.config.max_parallelism_per_worker,
        }
    }
}

async fn join_with_deadline(handle: WorkerHandle, deadline: Duration) {
    if tokio::time::timeout(deadline, handle.join).await.is_err() {
        warn!(worker = %handle.name, "worker did not stop within the drain deadline");
    }
}

/// Worker-pool counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Running workers
    pub workers: usize,
    /// Parallelism bound per worker
    pub max_parallelism_per_worker: u32,
}
